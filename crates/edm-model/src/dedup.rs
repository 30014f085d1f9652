//! Duplicate identity candidates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ids::{BatchId, CandidateId};
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    /// Keep record A, fold B into it.
    MergeA,
    /// Keep record B, fold A into it.
    MergeB,
    KeepBoth,
}

impl Resolution {
    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::MergeA => "merge_a",
            Self::MergeB => "merge_b",
            Self::KeepBoth => "keep_both",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Weighted fuzzy comparison across identity fields.
    WeightedFuzzy,
    /// Every compared identity field matched exactly.
    Exact,
}

/// Per-field similarities. Fields missing on either side are `None` and do not
/// contribute to the overall score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSimilarities {
    pub name_similarity: Option<f64>,
    pub dob_match: Option<bool>,
    pub phone_similarity: Option<f64>,
    pub email_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub candidate_id: CandidateId,
    pub batch_id: BatchId,
    pub target_table: String,
    pub record_a_id: String,
    pub record_a_data: Record,
    pub record_b_id: String,
    pub record_b_data: Record,
    pub overall_similarity: f64,
    pub field_similarities: FieldSimilarities,
    pub match_method: MatchMethod,
    pub resolution: Resolution,
    pub requires_human_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DedupCandidate {
    /// Moves a pending candidate to a terminal resolution, exactly once.
    pub fn resolve(
        &mut self,
        resolution: Resolution,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.resolution.is_pending() {
            return Err(EngineError::AlreadyResolved {
                candidate_id: self.candidate_id.to_string(),
            });
        }
        if resolution.is_pending() {
            return Err(EngineError::InvalidInput(
                "a candidate cannot be resolved to pending".to_string(),
            ));
        }
        let resolved_by = resolved_by.trim();
        if resolved_by.is_empty() {
            return Err(EngineError::MissingApprover {
                action: "dedup resolution",
            });
        }
        self.resolution = resolution;
        self.resolved_by = Some(resolved_by.to_string());
        self.resolved_at = Some(at);
        Ok(())
    }
}
