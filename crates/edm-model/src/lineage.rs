use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::BatchId;

/// One transformation applied on the way from source cell to target cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStep {
    pub rule_id: String,
    pub detail: String,
}

impl TransformStep {
    pub fn new(rule_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            detail: detail.into(),
        }
    }
}

/// Trail from one source cell to its target cell. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub batch_id: BatchId,
    pub source_file: String,
    pub source_row: u64,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub transformations: Vec<TransformStep>,
    pub validation_passed: bool,
    pub recorded_at: DateTime<Utc>,
}
