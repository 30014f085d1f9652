//! Mapping suggestions and human-confirmed mappings.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dna::PatternKind;
use crate::error::{EngineError, Result};
use crate::ids::SessionId;

/// Target table marker for columns that scored below the confidence floor.
pub const UNMAPPED: &str = "UNMAPPED";

/// A runner-up target for a source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeMapping {
    pub target_table: String,
    pub target_column: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Ranked suggestion for one source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Sorted by confidence descending, never above `confidence`.
    pub alternative_mappings: Vec<AlternativeMapping>,
    pub source_pattern: PatternKind,
}

impl MappingSuggestion {
    pub fn is_unmapped(&self) -> bool {
        self.target_table == UNMAPPED
    }

    /// `table.column` of the primary target.
    pub fn target_key(&self) -> String {
        format!("{}.{}", self.target_table, self.target_column)
    }
}

/// A suggestion after human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedMapping {
    #[serde(flatten)]
    pub suggestion: MappingSuggestion,
    pub user_modified: bool,
    pub user_skipped: bool,
    /// The engine's proposal, kept when the reviewer changed the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_suggestion: Option<Box<MappingSuggestion>>,
}

impl ConfirmedMapping {
    pub(crate) fn accepted(suggestion: MappingSuggestion) -> Self {
        Self {
            suggestion,
            user_modified: false,
            user_skipped: false,
            original_suggestion: None,
        }
    }

    pub fn source_column(&self) -> &str {
        &self.suggestion.source_column
    }

    pub fn target_table(&self) -> &str {
        &self.suggestion.target_table
    }

    pub fn target_column(&self) -> &str {
        &self.suggestion.target_column
    }

    /// True when the mapping writes to a target cell.
    pub fn is_active(&self) -> bool {
        !self.user_skipped && !self.suggestion.is_unmapped()
    }
}

/// Who confirmed a set of mappings, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub confirmed_by: String,
    pub confirmed_at: DateTime<Utc>,
    pub session_id: SessionId,
}

/// The only accepted executor input: mappings emitted by an explicit confirm.
///
/// Constructed by [`crate::ReviewSession::confirm`]. Deserialized copies pass
/// the same checks as a fresh confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedConfirmedMappings")]
pub struct ConfirmedMappings {
    schema_version: String,
    source_file: String,
    confirmation: Confirmation,
    mappings: Vec<ConfirmedMapping>,
}

#[derive(Deserialize)]
struct UncheckedConfirmedMappings {
    schema_version: String,
    source_file: String,
    confirmation: Confirmation,
    mappings: Vec<ConfirmedMapping>,
}

impl TryFrom<UncheckedConfirmedMappings> for ConfirmedMappings {
    type Error = EngineError;

    fn try_from(raw: UncheckedConfirmedMappings) -> Result<Self> {
        if raw.confirmation.confirmed_by.trim().is_empty() {
            return Err(EngineError::MissingApprover { action: "confirm" });
        }
        if raw.schema_version.trim().is_empty() {
            return Err(EngineError::NotConfirmed {
                reason: "schema version is blank".to_string(),
            });
        }
        check_confirmable(&raw.mappings)?;
        Ok(Self::new(
            raw.schema_version,
            raw.source_file,
            raw.confirmation,
            raw.mappings,
        ))
    }
}

/// Rejects unresolved UNMAPPED columns and targets fed by two columns.
pub(crate) fn check_confirmable(mappings: &[ConfirmedMapping]) -> Result<()> {
    let pending: Vec<&str> = mappings
        .iter()
        .filter(|m| !m.user_skipped && m.suggestion.is_unmapped())
        .map(ConfirmedMapping::source_column)
        .collect();
    if !pending.is_empty() {
        return Err(EngineError::NotConfirmed {
            reason: format!("unresolved UNMAPPED columns: {}", pending.join(", ")),
        });
    }
    let mut targets = BTreeSet::new();
    for mapping in mappings.iter().filter(|m| m.is_active()) {
        let key = mapping.suggestion.target_key();
        if !targets.insert(key.clone()) {
            return Err(EngineError::NotConfirmed {
                reason: format!("target {key} is mapped from more than one column"),
            });
        }
    }
    Ok(())
}

impl ConfirmedMappings {
    pub(crate) fn new(
        schema_version: String,
        source_file: String,
        confirmation: Confirmation,
        mappings: Vec<ConfirmedMapping>,
    ) -> Self {
        Self {
            schema_version,
            source_file,
            confirmation,
            mappings,
        }
    }

    /// `name@version` of the target schema the review ran against.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn confirmation(&self) -> &Confirmation {
        &self.confirmation
    }

    pub fn mappings(&self) -> &[ConfirmedMapping] {
        &self.mappings
    }

    /// Mappings that write to a target cell.
    pub fn active(&self) -> impl Iterator<Item = &ConfirmedMapping> {
        self.mappings.iter().filter(|m| m.is_active())
    }

    /// Distinct target tables referenced by active mappings, sorted.
    pub fn target_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .active()
            .map(|m| m.target_table().to_string())
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }
}
