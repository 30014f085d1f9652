//! Migration batch bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind, Result};
use crate::ids::BatchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    DryRun,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "DRY_RUN",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a set of confirmed mappings.
///
/// `success_count + error_count <= record_count` always holds; the two sides
/// are equal once the batch reaches a terminal status other than `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBatch {
    pub batch_id: BatchId,
    pub source_system: String,
    pub source_file: String,
    pub schema_version: String,
    pub record_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Rows waiting on the retry queue.
    pub pending_count: u64,
    pub status: BatchStatus,
    /// Transformed and validated only; nothing was written. Kept after the
    /// batch leaves `DRY_RUN` for its terminal status.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl MigrationBatch {
    pub fn start(
        batch_id: BatchId,
        source_system: impl Into<String>,
        source_file: impl Into<String>,
        schema_version: impl Into<String>,
        record_count: u64,
        dry_run: bool,
    ) -> Self {
        Self {
            batch_id,
            source_system: source_system.into(),
            source_file: source_file.into(),
            schema_version: schema_version.into(),
            record_count,
            success_count: 0,
            error_count: 0,
            pending_count: 0,
            status: if dry_run {
                BatchStatus::DryRun
            } else {
                BatchStatus::Processing
            },
            dry_run,
            snapshot_id: None,
            started_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Rows not yet committed, failed or queued for retry.
    pub fn unprocessed(&self) -> u64 {
        self.record_count
            .saturating_sub(self.success_count + self.error_count + self.pending_count)
    }

    fn ensure_open(&self, action: &'static str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                action,
            });
        }
        Ok(())
    }

    /// Moves the batch to a terminal status. Terminal batches are frozen.
    pub fn finalize(&mut self, status: BatchStatus, at: DateTime<Utc>) -> Result<()> {
        self.ensure_open("finalize batch")?;
        if !status.is_terminal() {
            return Err(EngineError::InvalidInput(format!(
                "{status} is not a terminal status"
            )));
        }
        self.status = status;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Marks the batch FAILED before any write happened.
    pub fn abort(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.finalize(BatchStatus::Failed, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn counters_consistent(&self) -> bool {
        let settled = self.success_count + self.error_count;
        if settled > self.record_count {
            return false;
        }
        match self.status {
            BatchStatus::Completed | BatchStatus::CompletedWithErrors => {
                settled == self.record_count
            }
            BatchStatus::Failed => true,
            BatchStatus::DryRun | BatchStatus::Processing => {
                settled + self.pending_count <= self.record_count
            }
        }
    }
}

/// A permanently failed row, with the rule that rejected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub batch_id: BatchId,
    pub source_row: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
    pub rule: String,
    pub message: String,
    pub kind: ErrorKind,
    pub recorded_at: DateTime<Utc>,
}
