use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, RetryId};
use crate::lineage::LineageRecord;
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Retrying,
    Exhausted,
    Succeeded,
}

impl RetryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Succeeded)
    }
}

/// A write that failed transiently and waits for out-of-band reprocessing.
///
/// The item carries everything needed to replay the write in a later process:
/// the target row and the lineage to append once it lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryQueueItem {
    pub retry_id: RetryId,
    pub migration_batch_id: BatchId,
    pub failed_operation: String,
    /// Idempotency key of the write; replays with the same key never duplicate.
    pub operation_key: String,
    pub target_table: String,
    pub source_row_numbers: Vec<u64>,
    pub record_id: String,
    pub payload: Record,
    #[serde(default)]
    pub lineage: Vec<LineageRecord>,
    pub error_code: String,
    pub error_message: String,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryQueueItem {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RetryStatus::Pending && self.next_retry_at <= now
    }
}
