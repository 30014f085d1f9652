//! Error taxonomy shared by every engine component.
//!
//! Each [`EngineError`] maps onto exactly one [`ErrorKind`], which callers use to
//! decide how a failure propagates: validation failures are permanent, transient
//! infrastructure failures are retried, rollback preconditions reject the request
//! without touching any table.

use thiserror::Error;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Row or field failed a declared rule. Never retried.
    Validation,
    /// Storage or network hiccup. Retried through the backoff queue.
    TransientInfra,
    /// Identity conflict, routed to deduplication.
    Conflict,
    /// Pre-migration snapshot could not be captured. Aborts the batch.
    Snapshot,
    /// Rollback target is missing or expired.
    SnapshotNotFound,
    /// Another operation holds an overlapping table set.
    ConcurrentMigrationInProgress,
    /// A dedup candidate was already resolved.
    AlreadyResolved,
    /// Mappings did not come from a confirmed review.
    NotConfirmed,
    /// Operation not allowed in the current state.
    InvalidTransition,
    /// Referenced entity does not exist.
    NotFound,
    /// Caller supplied malformed input.
    InvalidInput,
    /// Batch was cancelled before the row was processed.
    Cancelled,
    /// Non-retryable storage failure.
    Storage,
}

impl ErrorKind {
    /// Returns true when the failure should be retried through the queue.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientInfra)
    }

    /// Returns true for the rollback rejection categories.
    #[must_use]
    pub fn is_rollback_precondition(self) -> bool {
        matches!(
            self,
            Self::SnapshotNotFound | Self::ConcurrentMigrationInProgress
        )
    }

    /// Stable code used in failure logs and retry items.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::TransientInfra => "TRANSIENT_INFRA",
            Self::Conflict => "CONFLICT",
            Self::Snapshot => "SNAPSHOT",
            Self::SnapshotNotFound => "SNAPSHOT_NOT_FOUND",
            Self::ConcurrentMigrationInProgress => "CONCURRENT_MIGRATION_IN_PROGRESS",
            Self::AlreadyResolved => "ALREADY_RESOLVED",
            Self::NotConfirmed => "NOT_CONFIRMED",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::Storage => "STORAGE",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("row {row}, column '{column}' failed rule '{rule}': {message}")]
    Validation {
        row: u64,
        column: String,
        rule: String,
        message: String,
    },

    #[error("transient failure during {operation}: {message}")]
    TransientInfra { operation: String, message: String },

    #[error("identity conflict: {message}")]
    Conflict { message: String },

    #[error("snapshot failed{}: {message}", batch_suffix(.batch_id.as_deref()))]
    Snapshot {
        batch_id: Option<String>,
        message: String,
    },

    #[error("snapshot not found or expired: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    #[error("tables [{}] are locked by {holder}", .tables.join(", "))]
    ConcurrentMigrationInProgress { tables: Vec<String>, holder: String },

    #[error("an approver identity is required for {action}")]
    MissingApprover { action: &'static str },

    #[error("dedup candidate {candidate_id} is already resolved")]
    AlreadyResolved { candidate_id: String },

    #[error("mappings are not confirmed: {reason}")]
    NotConfirmed { reason: String },

    #[error("cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("batch {batch_id} was cancelled")]
    Cancelled { batch_id: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

fn batch_suffix(batch_id: Option<&str>) -> String {
    batch_id
        .map(|id| format!(" for batch {id}"))
        .unwrap_or_default()
}

impl EngineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::TransientInfra { .. } => ErrorKind::TransientInfra,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Snapshot { .. } => ErrorKind::Snapshot,
            Self::SnapshotNotFound { .. } => ErrorKind::SnapshotNotFound,
            Self::ConcurrentMigrationInProgress { .. } => {
                ErrorKind::ConcurrentMigrationInProgress
            }
            Self::MissingApprover { .. } | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            Self::NotConfirmed { .. } => ErrorKind::NotConfirmed,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
