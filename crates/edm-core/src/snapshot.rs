//! Point-in-time snapshots and rollback.
//!
//! A snapshot is captured, checksummed and (when a persistence directory is
//! configured) durably written before it is returned. Snapshots are never
//! edited: a rollback is recorded as a separate [`RollbackEvent`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use edm_config::sha256_hex;
use edm_model::{
    BatchId, EngineError, MigrationSnapshot, Result, RollbackEvent, RollbackId, SnapshotId,
    SnapshotSettings, SnapshotStatus, SnapshotType, TableData,
};
use tracing::{info, warn};

use crate::io::{read_json, write_json_atomic};
use crate::lock::TableLockRegistry;
use crate::store::TargetStore;

const ROLLBACK_LOG: &str = "rollbacks.json";

fn poisoned() -> EngineError {
    EngineError::Storage {
        message: "snapshot registry lock poisoned".to_string(),
    }
}

/// SHA-256 over the canonical JSON of the captured tables.
pub fn snapshot_checksum(data: &BTreeMap<String, TableData>) -> Result<(String, u64)> {
    let bytes = serde_json::to_vec(data).map_err(|e| EngineError::Storage {
        message: format!("failed to encode snapshot data: {e}"),
    })?;
    Ok((sha256_hex(&bytes), bytes.len() as u64))
}

pub struct SnapshotManager {
    store: Arc<dyn TargetStore>,
    locks: TableLockRegistry,
    settings: SnapshotSettings,
    snapshots: RwLock<BTreeMap<SnapshotId, MigrationSnapshot>>,
    rollbacks: RwLock<Vec<RollbackEvent>>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// Opens the manager, reloading persisted snapshots and rollback events.
    pub fn new(
        store: Arc<dyn TargetStore>,
        locks: TableLockRegistry,
        settings: SnapshotSettings,
    ) -> Result<Self> {
        let mut snapshots = BTreeMap::new();
        let mut rollbacks: Vec<RollbackEvent> = Vec::new();
        if let Some(dir) = &settings.persist_dir {
            for snapshot in load_persisted(dir)? {
                snapshots.insert(snapshot.snapshot_id.clone(), snapshot);
            }
            rollbacks = read_json(&dir.join(ROLLBACK_LOG))?.unwrap_or_default();
        }
        Ok(Self {
            store,
            locks,
            settings,
            snapshots: RwLock::new(snapshots),
            rollbacks: RwLock::new(rollbacks),
        })
    }

    fn snapshot_path(dir: &Path, id: &SnapshotId) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// Captures the current rows of `tables`.
    ///
    /// Returns only after the snapshot is durable; any failure is a
    /// [`EngineError::Snapshot`].
    pub fn create_snapshot(
        &self,
        tables: &[String],
        name: &str,
        snapshot_type: SnapshotType,
        batch_id: Option<&BatchId>,
    ) -> Result<MigrationSnapshot> {
        let snapshot_error = |message: String| EngineError::Snapshot {
            batch_id: batch_id.map(ToString::to_string),
            message,
        };

        let mut data = BTreeMap::new();
        for table in tables {
            let rows = self
                .store
                .read_table(table)
                .map_err(|e| snapshot_error(format!("could not read {table}: {e}")))?;
            data.insert(table.clone(), rows);
        }
        let (checksum, size_bytes) =
            snapshot_checksum(&data).map_err(|e| snapshot_error(e.to_string()))?;
        let total_rows = data.values().map(|t| t.len() as u64).sum();
        let created_at = Utc::now();
        let expires_at = match self.settings.retention_hours {
            None => None,
            Some(hours) => Some(
                Duration::try_hours(hours)
                    .and_then(|retention| created_at.checked_add_signed(retention))
                    .ok_or_else(|| {
                        snapshot_error(format!("retention of {hours} hours is out of range"))
                    })?,
            ),
        };

        let snapshot = MigrationSnapshot {
            snapshot_id: SnapshotId::generate(),
            migration_batch_id: batch_id.map(ToString::to_string),
            snapshot_name: name.to_string(),
            snapshot_type,
            tables_included: tables.to_vec(),
            snapshot_data: data,
            total_rows,
            size_bytes,
            checksum,
            status: SnapshotStatus::Completed,
            created_at,
            expires_at,
        };

        if let Some(dir) = &self.settings.persist_dir {
            write_json_atomic(&Self::snapshot_path(dir, &snapshot.snapshot_id), &snapshot)
                .map_err(|e| snapshot_error(e.to_string()))?;
        }

        self.snapshots
            .write()
            .map_err(|_| poisoned())?
            .insert(snapshot.snapshot_id.clone(), snapshot.clone());
        info!(
            snapshot_id = %snapshot.snapshot_id,
            tables = snapshot.tables_included.len(),
            rows = snapshot.total_rows,
            bytes = snapshot.size_bytes,
            "created snapshot"
        );
        Ok(snapshot)
    }

    pub fn get(&self, snapshot_id: &str) -> Option<MigrationSnapshot> {
        let id = SnapshotId::new(snapshot_id).ok()?;
        self.snapshots.read().ok()?.get(&id).cloned()
    }

    /// Snapshots ordered by creation time.
    pub fn list(&self) -> Vec<MigrationSnapshot> {
        let mut snapshots: Vec<MigrationSnapshot> = self
            .snapshots
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    pub fn rollback_events(&self) -> Vec<RollbackEvent> {
        self.rollbacks.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Restores every table in the snapshot to its captured contents.
    ///
    /// All-or-nothing: preconditions and the checksum are verified before any
    /// table is touched, and a failed restore puts back the contents the
    /// tables had before the rollback started. Tables claimed by a batch that
    /// has not reached a terminal status are refused.
    pub fn rollback(
        &self,
        snapshot_id: &str,
        reason: &str,
        approver: &str,
        now: DateTime<Utc>,
    ) -> Result<RollbackEvent> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(EngineError::MissingApprover { action: "rollback" });
        }
        let not_found = || EngineError::SnapshotNotFound {
            snapshot_id: snapshot_id.to_string(),
        };
        let snapshot = self.get(snapshot_id).ok_or_else(not_found)?;
        if snapshot.is_expired(now) {
            return Err(not_found());
        }

        let (checksum, _) = snapshot_checksum(&snapshot.snapshot_data)?;
        if checksum != snapshot.checksum {
            return Err(EngineError::Snapshot {
                batch_id: snapshot.migration_batch_id.clone(),
                message: format!("checksum mismatch for snapshot {snapshot_id}"),
            });
        }

        let _lease = self
            .locks
            .acquire_exclusive(&snapshot.tables_included, &format!("rollback:{snapshot_id}"))?;

        let mut current = BTreeMap::new();
        for table in snapshot.snapshot_data.keys() {
            current.insert(table.clone(), self.store.read_table(table)?);
        }
        let mut replaced: Vec<&str> = Vec::with_capacity(current.len());
        for (table, rows) in &snapshot.snapshot_data {
            if let Err(error) = self.store.replace_table(table, rows.clone()) {
                warn!(snapshot_id, table, %error, "rollback failed, restoring current contents");
                self.put_back(&replaced, &current);
                return Err(error);
            }
            replaced.push(table);
        }

        let event = RollbackEvent {
            rollback_id: RollbackId::generate(),
            snapshot_id: snapshot.snapshot_id.clone(),
            reason: reason.to_string(),
            approver: approver.to_string(),
            tables: snapshot.tables_included.clone(),
            rows_restored: snapshot.total_rows,
            performed_at: now,
        };
        {
            let mut rollbacks = self.rollbacks.write().map_err(|_| poisoned())?;
            if let Some(dir) = &self.settings.persist_dir {
                let mut log = rollbacks.clone();
                log.push(event.clone());
                if let Err(error) = write_json_atomic(&dir.join(ROLLBACK_LOG), &log) {
                    warn!(snapshot_id, %error, "could not record rollback, restoring current contents");
                    self.put_back(&replaced, &current);
                    return Err(error);
                }
            }
            rollbacks.push(event.clone());
        }
        warn!(
            snapshot_id,
            approver,
            reason,
            rows = event.rows_restored,
            "rolled back target tables"
        );
        Ok(event)
    }

    /// Reinstates the pre-rollback contents of tables already replaced.
    fn put_back(&self, replaced: &[&str], current: &BTreeMap<String, TableData>) {
        for &table in replaced {
            let rows = current.get(table).cloned().unwrap_or_default();
            if let Err(error) = self.store.replace_table(table, rows) {
                warn!(table, %error, "could not restore table after failed rollback");
            }
        }
    }

    /// Removes snapshots past their retention. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        let expired: Vec<SnapshotId> = snapshots
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.snapshot_id.clone())
            .collect();
        for id in &expired {
            snapshots.remove(id);
            if let Some(dir) = &self.settings.persist_dir {
                let path = Self::snapshot_path(dir, id);
                if path.exists() {
                    fs::remove_file(&path).map_err(|e| EngineError::Storage {
                        message: format!("failed to remove {}: {e}", path.display()),
                    })?;
                }
            }
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "purged expired snapshots");
        }
        Ok(expired.len())
    }
}

fn load_persisted(dir: &Path) -> Result<Vec<MigrationSnapshot>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| EngineError::Storage {
        message: format!("failed to read {}: {e}", dir.display()),
    })?;
    let mut snapshots = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("snap-") && n.ends_with(".json"));
        if !is_snapshot {
            continue;
        }
        match read_json::<MigrationSnapshot>(&path) {
            Ok(Some(snapshot)) => snapshots.push(snapshot),
            Ok(None) => {}
            Err(error) => warn!(path = %path.display(), %error, "skipping unreadable snapshot"),
        }
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use edm_model::{CellValue, ErrorKind, Record};

    use super::*;
    use crate::store::InMemoryStore;

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store
            .upsert(
                "patients",
                "p1",
                Record::from([("mrn".to_string(), CellValue::text("A1"))]),
            )
            .expect("seed");
        Arc::new(store)
    }

    #[test]
    fn rollback_requires_an_approver() {
        let store = seeded_store();
        let manager =
            SnapshotManager::new(store, TableLockRegistry::new(), SnapshotSettings::default())
                .expect("manager");
        let snapshot = manager
            .create_snapshot(&["patients".to_string()], "manual", SnapshotType::Manual, None)
            .expect("snapshot");
        let error = manager
            .rollback(snapshot.snapshot_id.as_str(), "oops", " ", Utc::now())
            .unwrap_err();
        assert!(matches!(error, EngineError::MissingApprover { .. }));
    }

    #[test]
    fn expired_snapshot_is_not_found() {
        let store = seeded_store();
        let settings = SnapshotSettings {
            retention_hours: Some(1),
            persist_dir: None,
        };
        let manager =
            SnapshotManager::new(store, TableLockRegistry::new(), settings).expect("manager");
        let snapshot = manager
            .create_snapshot(&["patients".to_string()], "manual", SnapshotType::Manual, None)
            .expect("snapshot");
        let later = Utc::now() + Duration::hours(2);
        let error = manager
            .rollback(snapshot.snapshot_id.as_str(), "late", "ops@clinic", later)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SnapshotNotFound);
        assert_eq!(manager.purge_expired(later).expect("purge"), 1);
        assert!(manager.list().is_empty());
    }

    #[test]
    fn oversized_retention_fails_the_snapshot() {
        let settings = SnapshotSettings {
            retention_hours: Some(10_000_000_000),
            persist_dir: None,
        };
        let manager = SnapshotManager::new(seeded_store(), TableLockRegistry::new(), settings)
            .expect("manager");
        let error = manager
            .create_snapshot(&["patients".to_string()], "manual", SnapshotType::Manual, None)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Snapshot);
        assert!(manager.list().is_empty());
    }

    #[test]
    fn unreadable_table_fails_the_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_reads("patients");
        let manager =
            SnapshotManager::new(store, TableLockRegistry::new(), SnapshotSettings::default())
                .expect("manager");
        let error = manager
            .create_snapshot(
                &["patients".to_string()],
                "pre",
                SnapshotType::PreMigration,
                None,
            )
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Snapshot);
    }
}
