//! Mapping engine implementation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use edm_model::{
    AlternativeMapping, ColumnDna, MappingSettings, MappingSuggestion, PatternCompatibility,
    SourceDna, TargetSchema, UNMAPPED,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::history::{HistoricalMigration, HistoryMatches, SimilarMigration};
use crate::score::{CandidateScore, score_candidate};
use crate::synonyms::SynonymMap;

/// Confidence level categories for mapping quality assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Uncertain; requires manual verification.
    Low,
    /// Reasonable but should be reviewed.
    Medium,
    /// Near-certain.
    High,
}

impl ConfidenceLevel {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::High => "high confidence - likely correct",
            Self::Medium => "medium confidence - should review",
            Self::Low => "low confidence - needs verification",
        }
    }
}

/// Boundaries between confidence levels.
///
/// Below `low` a suggestion has no level.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.95,
            medium: 0.80,
            low: 0.60,
        }
    }
}

impl ConfidenceThresholds {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            high: 0.98,
            medium: 0.90,
            low: 0.75,
        }
    }

    #[must_use]
    pub fn relaxed() -> Self {
        Self {
            high: 0.90,
            medium: 0.70,
            low: 0.50,
        }
    }

    #[must_use]
    pub fn categorize(&self, confidence: f64) -> Option<ConfidenceLevel> {
        if confidence >= self.high {
            Some(ConfidenceLevel::High)
        } else if confidence >= self.medium {
            Some(ConfidenceLevel::Medium)
        } else if confidence >= self.low {
            Some(ConfidenceLevel::Low)
        } else {
            None
        }
    }
}

/// Output of [`MappingEngine::suggest`], handed to the review gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingReport {
    /// `name@version` of the schema the suggestions target.
    pub schema_version: String,
    pub source_file: String,
    /// One per source column, sorted by confidence descending.
    pub suggestions: Vec<MappingSuggestion>,
    pub similar_past_migrations: Vec<SimilarMigration>,
    /// Mean suggestion confidence weighted by column fill rate; UNMAPPED counts as zero.
    pub estimated_accuracy: f64,
    pub auto_execute_permitted: bool,
}

impl MappingReport {
    pub fn unmapped_columns(&self) -> Vec<&str> {
        self.suggestions
            .iter()
            .filter(|s| s.is_unmapped())
            .map(|s| s.source_column.as_str())
            .collect()
    }

    #[must_use]
    pub fn count_by_level(&self) -> BTreeMap<ConfidenceLevel, usize> {
        self.count_by_level_with(&ConfidenceThresholds::default())
    }

    #[must_use]
    pub fn count_by_level_with(
        &self,
        thresholds: &ConfidenceThresholds,
    ) -> BTreeMap<ConfidenceLevel, usize> {
        let mut counts = BTreeMap::new();
        for suggestion in self.suggestions.iter().filter(|s| !s.is_unmapped()) {
            if let Some(level) = thresholds.categorize(suggestion.confidence) {
                *counts.entry(level).or_insert(0) += 1;
            }
        }
        counts
    }
}

struct Candidate<'a> {
    table: &'a str,
    column: &'a str,
    score: CandidateScore,
}

/// Proposes ranked target mappings for profiled sources.
///
/// The schema is injected; several engines over different schema versions
/// may coexist.
#[derive(Debug, Clone)]
pub struct MappingEngine {
    schema: TargetSchema,
    settings: MappingSettings,
    history: Vec<HistoricalMigration>,
    synonyms: SynonymMap,
}

impl MappingEngine {
    pub fn new(
        schema: TargetSchema,
        settings: MappingSettings,
        history: Vec<HistoricalMigration>,
    ) -> Self {
        let synonyms = SynonymMap::build(&schema);
        Self {
            schema,
            settings,
            history,
            synonyms,
        }
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    pub fn settings(&self) -> &MappingSettings {
        &self.settings
    }

    /// Adds a confirmed migration to the precedent corpus.
    pub fn record_history(&mut self, migration: HistoricalMigration) {
        self.history.retain(|m| m.migration_id != migration.migration_id);
        self.history.push(migration);
    }

    pub fn suggest(&self, dna: &SourceDna) -> MappingReport {
        let start = Instant::now();
        let matches = HistoryMatches::find(
            dna,
            &self.history,
            &self.schema.version_key(),
            self.settings.history_similarity_threshold,
        );

        let mut suggestions: Vec<MappingSuggestion> = dna
            .columns
            .iter()
            .map(|column| self.suggest_column(column, &matches))
            .collect();
        annotate_shared_targets(&mut suggestions);
        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source_column.cmp(&b.source_column))
        });

        let estimated_accuracy = estimated_accuracy(dna, &suggestions);
        let auto_execute_permitted = !suggestions.is_empty()
            && suggestions.iter().all(|s| !s.is_unmapped())
            && estimated_accuracy >= self.settings.auto_execute_min_accuracy;

        info!(
            source_file = %dna.source_file,
            schema = %self.schema.version_key(),
            columns = suggestions.len(),
            unmapped = suggestions.iter().filter(|s| s.is_unmapped()).count(),
            estimated_accuracy,
            similar_migrations = matches.summaries().len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "generated mapping suggestions"
        );

        MappingReport {
            schema_version: self.schema.version_key(),
            source_file: dna.source_file.clone(),
            suggestions,
            similar_past_migrations: matches.summaries(),
            estimated_accuracy,
            auto_execute_permitted,
        }
    }

    fn suggest_column(&self, column: &ColumnDna, matches: &HistoryMatches) -> MappingSuggestion {
        let mut candidates: Vec<Candidate<'_>> = self
            .schema
            .all_columns()
            .filter_map(|(table, target_column, def)| {
                let compatibility = def.semantic_type.compatibility(column.primary_pattern);
                if compatibility == PatternCompatibility::Incompatible {
                    return None;
                }
                let precedent = matches.precedent(&column.original_name, table, target_column);
                let score = score_candidate(
                    column,
                    table,
                    target_column,
                    def,
                    compatibility,
                    precedent.as_ref(),
                    &self.synonyms,
                    &self.settings.weights,
                );
                Some(Candidate {
                    table,
                    column: target_column,
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .confidence
                .partial_cmp(&a.score.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.table.cmp(b.table))
                .then_with(|| a.column.cmp(b.column))
        });

        let to_alternative = |c: &Candidate<'_>| AlternativeMapping {
            target_table: c.table.to_string(),
            target_column: c.column.to_string(),
            confidence: c.score.confidence,
            reasons: c.score.reasons(),
        };

        let best_confidence = candidates.first().map_or(0.0, |c| c.score.confidence);
        if candidates.is_empty() || best_confidence < self.settings.min_confidence {
            debug!(
                column = %column.original_name,
                best_confidence,
                "column left unmapped"
            );
            let reason = if candidates.is_empty() {
                format!(
                    "no target column accepts {} values",
                    column.primary_pattern
                )
            } else {
                format!(
                    "best candidate scored {:.0}%, below the {:.0}% floor",
                    best_confidence * 100.0,
                    self.settings.min_confidence * 100.0
                )
            };
            return MappingSuggestion {
                source_column: column.original_name.clone(),
                target_table: UNMAPPED.to_string(),
                target_column: String::new(),
                confidence: best_confidence,
                reasons: vec![reason],
                alternative_mappings: candidates
                    .iter()
                    .take(self.settings.max_alternatives)
                    .map(to_alternative)
                    .collect(),
                source_pattern: column.primary_pattern,
            };
        }

        let primary = &candidates[0];
        debug!(
            column = %column.original_name,
            target = %format!("{}.{}", primary.table, primary.column),
            confidence = primary.score.confidence,
            explain = %primary.score.explain(),
            "scored column"
        );
        MappingSuggestion {
            source_column: column.original_name.clone(),
            target_table: primary.table.to_string(),
            target_column: primary.column.to_string(),
            confidence: primary.score.confidence,
            reasons: primary.score.reasons(),
            alternative_mappings: candidates
                .iter()
                .skip(1)
                .take(self.settings.max_alternatives)
                .map(to_alternative)
                .collect(),
            source_pattern: column.primary_pattern,
        }
    }
}

/// Notes targets proposed for more than one source column; the reviewer decides.
fn annotate_shared_targets(suggestions: &mut [MappingSuggestion]) {
    let mut by_target: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for suggestion in suggestions.iter().filter(|s| !s.is_unmapped()) {
        by_target
            .entry(suggestion.target_key())
            .or_default()
            .insert(suggestion.source_column.clone());
    }
    for suggestion in suggestions.iter_mut().filter(|s| !s.is_unmapped()) {
        if let Some(sources) = by_target.get(&suggestion.target_key())
            && sources.len() > 1
        {
            let others: Vec<&str> = sources
                .iter()
                .map(String::as_str)
                .filter(|s| *s != suggestion.source_column)
                .collect();
            suggestion.reasons.push(format!(
                "Target also proposed for: {}",
                others.join(", ")
            ));
        }
    }
}

fn estimated_accuracy(dna: &SourceDna, suggestions: &[MappingSuggestion]) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for suggestion in suggestions {
        let fill = dna
            .column(&suggestion.source_column)
            .map_or(1.0, |c| 1.0 - c.null_percentage);
        let confidence = if suggestion.is_unmapped() {
            0.0
        } else {
            suggestion.confidence
        };
        weighted += confidence * fill;
        total_weight += fill;
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    (weighted / total_weight).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_categorize_boundaries() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(thresholds.categorize(0.95), Some(ConfidenceLevel::High));
        assert_eq!(thresholds.categorize(0.80), Some(ConfidenceLevel::Medium));
        assert_eq!(thresholds.categorize(0.60), Some(ConfidenceLevel::Low));
        assert_eq!(thresholds.categorize(0.59), None);
        assert_eq!(ConfidenceThresholds::strict().categorize(0.95), Some(ConfidenceLevel::Medium));
        assert_eq!(ConfidenceThresholds::relaxed().categorize(0.5), Some(ConfidenceLevel::Low));
    }
}
