//! Exclusive leases over target table sets.
//!
//! A running batch and a rollback both hold a lease over the tables they
//! write. Overlapping requests are rejected, never queued.
//!
//! A batch that is still open after its run (rows waiting on retries) keeps a
//! claim on its tables. Claims do not block ordinary leases, but
//! [`TableLockRegistry::acquire_exclusive`] refuses tables claimed by another
//! holder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use edm_model::{EngineError, Result};
use tracing::debug;

#[derive(Debug, Default)]
struct LockState {
    /// table -> lease holder
    held: BTreeMap<String, String>,
    /// holder -> tables it still has unfinished work on
    claims: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct TableLockRegistry {
    state: Arc<Mutex<LockState>>,
}

fn lock_state(state: &Mutex<LockState>) -> Result<MutexGuard<'_, LockState>> {
    state.lock().map_err(|_| EngineError::Storage {
        message: "table lock registry poisoned".to_string(),
    })
}

fn table_set<I, S>(tables: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tables
        .into_iter()
        .map(|t| t.as_ref().to_string())
        .collect()
}

impl TableLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases every table in `tables` for `holder`, or none of them.
    pub fn acquire<I, S>(&self, tables: I, holder: &str) -> Result<TableLease>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lease(table_set(tables), holder, false)
    }

    /// Like [`TableLockRegistry::acquire`], but also rejects tables claimed by
    /// another holder's open batch.
    pub fn acquire_exclusive<I, S>(&self, tables: I, holder: &str) -> Result<TableLease>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lease(table_set(tables), holder, true)
    }

    fn lease(&self, tables: BTreeSet<String>, holder: &str, exclusive: bool) -> Result<TableLease> {
        let mut state = lock_state(&self.state)?;

        let conflicts: Vec<(String, String)> = tables
            .iter()
            .filter_map(|t| state.held.get(t).map(|h| (t.clone(), h.clone())))
            .collect();
        if let Some((_, other)) = conflicts.first() {
            return Err(EngineError::ConcurrentMigrationInProgress {
                tables: conflicts.iter().map(|(t, _)| t.clone()).collect(),
                holder: other.clone(),
            });
        }

        if exclusive {
            let claimed = state
                .claims
                .iter()
                .filter(|(claimant, _)| claimant.as_str() != holder)
                .find_map(|(claimant, claimed)| {
                    let overlap: Vec<String> = claimed.intersection(&tables).cloned().collect();
                    (!overlap.is_empty()).then(|| (claimant.clone(), overlap))
                });
            if let Some((claimant, overlap)) = claimed {
                return Err(EngineError::ConcurrentMigrationInProgress {
                    tables: overlap,
                    holder: claimant,
                });
            }
        }

        for table in &tables {
            state.held.insert(table.clone(), holder.to_string());
        }
        debug!(holder, tables = ?tables, exclusive, "acquired table lease");
        Ok(TableLease {
            registry: self.state.clone(),
            tables,
            holder: holder.to_string(),
        })
    }

    /// Records that `holder` has unfinished work on `tables`.
    pub fn claim<I, S>(&self, tables: I, holder: &str) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tables = table_set(tables);
        if tables.is_empty() {
            return Ok(());
        }
        let mut state = lock_state(&self.state)?;
        state
            .claims
            .entry(holder.to_string())
            .or_default()
            .extend(tables);
        Ok(())
    }

    /// Drops every claim of `holder`. Returns whether one existed.
    pub fn release_claim(&self, holder: &str) -> Result<bool> {
        let released = lock_state(&self.state)?.claims.remove(holder).is_some();
        if released {
            debug!(holder, "released table claim");
        }
        Ok(released)
    }

    pub fn claimed_by(&self, holder: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.claims.get(holder).cloned())
            .unwrap_or_default()
    }

    pub fn holder_of(&self, table: &str) -> Option<String> {
        self.state.lock().ok()?.held.get(table).cloned()
    }

    pub fn is_locked(&self, table: &str) -> bool {
        self.holder_of(table).is_some()
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct TableLease {
    registry: Arc<Mutex<LockState>>,
    tables: BTreeSet<String>,
    holder: String,
}

impl TableLease {
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for TableLease {
    fn drop(&mut self) {
        if let Ok(mut state) = self.registry.lock() {
            for table in &self.tables {
                if state.held.get(table) == Some(&self.holder) {
                    state.held.remove(table);
                }
            }
        }
        debug!(holder = %self.holder, "released table lease");
    }
}

#[cfg(test)]
mod tests {
    use edm_model::ErrorKind;

    use super::*;

    #[test]
    fn overlapping_leases_are_rejected_until_released() {
        let registry = TableLockRegistry::new();
        let lease = registry
            .acquire(["patients", "encounters"], "batch-1")
            .expect("first lease");

        let error = registry
            .acquire(["encounters", "hc_staff"], "rollback")
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConcurrentMigrationInProgress);
        assert!(!registry.is_locked("hc_staff"));

        registry
            .acquire(["hc_staff"], "batch-2")
            .expect("disjoint lease");

        drop(lease);
        registry
            .acquire(["encounters"], "rollback")
            .expect("lease after release");
    }

    #[test]
    fn claims_only_block_exclusive_leases() {
        let registry = TableLockRegistry::new();
        registry.claim(["patients"], "batch-1").expect("claim");

        let retry = registry
            .acquire(["patients"], "retry-processor")
            .expect("plain lease ignores claims");
        drop(retry);

        let error = registry
            .acquire_exclusive(["patients", "hc_staff"], "rollback")
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConcurrentMigrationInProgress);
        assert!(error.to_string().contains("batch-1"));
        assert!(!registry.is_locked("hc_staff"));

        registry
            .acquire_exclusive(["hc_staff"], "rollback")
            .expect("unclaimed table");
        assert!(registry.release_claim("batch-1").expect("release"));
        registry
            .acquire_exclusive(["patients"], "rollback")
            .expect("claim released");
    }
}
