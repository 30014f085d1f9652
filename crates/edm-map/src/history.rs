//! Past confirmed migrations used as precedent.
//!
//! Sources are compared by the cosine similarity of their pattern vectors.
//! A past migration lends weight to a candidate only when it is at least
//! `history_similarity_threshold` alike, was confirmed against the same schema
//! version and mapped an equivalent column to the same target.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use edm_model::{ConfirmedMappings, PatternKind, SourceDna};
use serde::{Deserialize, Serialize};

use crate::score::Precedent;
use crate::utils::{core_tokens, normalize_text, token_set};

/// One confirmed mapping from a past migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMapping {
    pub source_column: String,
    pub source_pattern: PatternKind,
    pub target_table: String,
    pub target_column: String,
}

/// A completed, confirmed migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMigration {
    pub migration_id: String,
    #[serde(default)]
    pub source_system: Option<String>,
    pub source_file: String,
    pub schema_version: String,
    pub pattern_vector: BTreeMap<PatternKind, usize>,
    pub mappings: Vec<HistoricalMapping>,
    pub confirmed_at: DateTime<Utc>,
}

impl HistoricalMigration {
    /// Records the active mappings of a confirmed review against its profile.
    pub fn from_confirmed(
        migration_id: impl Into<String>,
        dna: &SourceDna,
        confirmed: &ConfirmedMappings,
    ) -> Self {
        let mappings = confirmed
            .active()
            .map(|m| HistoricalMapping {
                source_column: m.source_column().to_string(),
                source_pattern: m.suggestion.source_pattern,
                target_table: m.target_table().to_string(),
                target_column: m.target_column().to_string(),
            })
            .collect();
        Self {
            migration_id: migration_id.into(),
            source_system: dna.source_system.clone(),
            source_file: dna.source_file.clone(),
            schema_version: confirmed.schema_version().to_string(),
            pattern_vector: dna.pattern_vector(),
            mappings,
            confirmed_at: confirmed.confirmation().confirmed_at,
        }
    }
}

/// A past migration whose source resembles the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMigration {
    pub migration_id: String,
    pub source_system: Option<String>,
    pub similarity: f64,
    pub mapped_columns: usize,
}

/// Cosine similarity of two pattern count vectors.
pub fn pattern_similarity(
    a: &BTreeMap<PatternKind, usize>,
    b: &BTreeMap<PatternKind, usize>,
) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for kind in PatternKind::ALL {
        let x = a.get(&kind).copied().unwrap_or(0) as f64;
        let y = b.get(&kind).copied().unwrap_or(0) as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

fn equivalent_columns(a: &str, b: &str) -> bool {
    if normalize_text(a) == normalize_text(b) {
        return true;
    }
    let core_a = core_tokens(&token_set(a));
    !core_a.is_empty() && core_a == core_tokens(&token_set(b))
}

/// Past migrations relevant to one source profile.
#[derive(Debug, Clone, Default)]
pub struct HistoryMatches {
    matches: Vec<(f64, HistoricalMigration)>,
}

impl HistoryMatches {
    /// Keeps migrations confirmed against `schema_version` at or above
    /// `threshold`, most similar first.
    pub fn find(
        dna: &SourceDna,
        history: &[HistoricalMigration],
        schema_version: &str,
        threshold: f64,
    ) -> Self {
        let vector = dna.pattern_vector();
        let mut matches: Vec<(f64, HistoricalMigration)> = history
            .iter()
            .filter(|migration| migration.schema_version == schema_version)
            .map(|migration| (pattern_similarity(&vector, &migration.pattern_vector), migration))
            .filter(|(similarity, _)| *similarity >= threshold)
            .map(|(similarity, migration)| (similarity, migration.clone()))
            .collect();
        matches.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.migration_id.cmp(&b.1.migration_id))
        });
        Self { matches }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Strongest precedent for mapping `source_column` to `table.column`.
    pub fn precedent(&self, source_column: &str, table: &str, column: &str) -> Option<Precedent> {
        self.matches.iter().find_map(|(similarity, migration)| {
            migration
                .mappings
                .iter()
                .any(|m| {
                    m.target_table == table
                        && m.target_column == column
                        && equivalent_columns(&m.source_column, source_column)
                })
                .then(|| Precedent {
                    migration_id: migration.migration_id.clone(),
                    similarity: *similarity,
                })
        })
    }

    pub fn summaries(&self) -> Vec<SimilarMigration> {
        self.matches
            .iter()
            .map(|(similarity, migration)| SimilarMigration {
                migration_id: migration.migration_id.clone(),
                source_system: migration.source_system.clone(),
                similarity: *similarity,
                mapped_columns: migration.mappings.len(),
            })
            .collect()
    }
}
