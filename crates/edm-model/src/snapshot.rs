//! Pre-migration snapshots and rollback events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RollbackId, SnapshotId};
use crate::value::TableData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    PreMigration,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Captured and, when configured, durably written.
    Completed,
}

/// Immutable point-in-time copy of a set of target tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSnapshot {
    pub snapshot_id: SnapshotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_batch_id: Option<String>,
    pub snapshot_name: String,
    pub snapshot_type: SnapshotType,
    pub tables_included: Vec<String>,
    pub snapshot_data: BTreeMap<String, TableData>,
    pub total_rows: u64,
    pub size_bytes: u64,
    /// SHA-256 of the serialized `snapshot_data`.
    pub checksum: String,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MigrationSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Audit record of one rollback. Snapshots themselves are never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub rollback_id: RollbackId,
    pub snapshot_id: SnapshotId,
    pub reason: String,
    pub approver: String,
    pub tables: Vec<String>,
    pub rows_restored: u64,
    pub performed_at: DateTime<Utc>,
}
