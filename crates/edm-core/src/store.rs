//! Target table storage.
//!
//! The executor, snapshot manager and dedup engine only talk to the target
//! database through [`TargetStore`]. Writes are upserts keyed by record id, so
//! replaying a write after a partial failure never duplicates a record.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use edm_model::{EngineError, Record, Result, TableData};
use tracing::debug;

use crate::io::{read_json, write_json_atomic};

pub trait TargetStore: Send + Sync {
    fn table_names(&self) -> Result<Vec<String>>;

    /// Full contents of `table`; an unknown table reads as empty.
    fn read_table(&self, table: &str) -> Result<TableData>;

    fn get(&self, table: &str, record_id: &str) -> Result<Option<Record>>;

    /// Inserts or replaces one record.
    fn upsert(&self, table: &str, record_id: &str, record: Record) -> Result<()>;

    fn remove(&self, table: &str, record_id: &str) -> Result<bool>;

    /// Replaces a table's contents in one step.
    fn replace_table(&self, table: &str, data: TableData) -> Result<()>;
}

fn poisoned() -> EngineError {
    EngineError::Storage {
        message: "target store lock poisoned".to_string(),
    }
}

/// Scheduled failures, for exercising retry and snapshot paths.
#[derive(Debug, Default)]
struct FaultPlan {
    /// `(table, record_id)` to remaining transient write failures.
    writes: BTreeMap<(String, String), u32>,
    /// Tables whose reads fail.
    unreadable: Vec<String>,
    /// Tables whose whole-table replacement fails.
    unreplaceable: Vec<String>,
}

/// Thread-safe in-memory target database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<String, TableData>>,
    faults: Mutex<FaultPlan>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: BTreeMap<String, TableData>) -> Self {
        Self {
            tables: RwLock::new(tables),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Loads tables previously written by [`InMemoryStore::save_json`].
    pub fn load_json(path: &Path) -> Result<Self> {
        let tables: Option<BTreeMap<String, TableData>> = read_json(path)?;
        Ok(Self::with_tables(tables.unwrap_or_default()))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        write_json_atomic(path, &*tables)
    }

    /// Makes the next `times` writes of `record_id` into `table` fail transiently.
    pub fn fail_writes(&self, table: &str, record_id: &str, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults
                .writes
                .insert((table.to_string(), record_id.to_string()), times);
        }
    }

    /// Makes every read of `table` fail.
    pub fn fail_reads(&self, table: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unreadable.push(table.to_string());
        }
    }

    /// Makes every [`TargetStore::replace_table`] of `table` fail.
    pub fn fail_replaces(&self, table: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unreplaceable.push(table.to_string());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = FaultPlan::default();
        }
    }

    fn take_write_fault(&self, table: &str, record_id: &str) -> bool {
        let Ok(mut faults) = self.faults.lock() else {
            return false;
        };
        let key = (table.to_string(), record_id.to_string());
        match faults.writes.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn replace_fails(&self, table: &str) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.unreplaceable.iter().any(|t| t == table))
            .unwrap_or(false)
    }

    fn read_fails(&self, table: &str) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.unreadable.iter().any(|t| t == table))
            .unwrap_or(false)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|tables| tables.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

impl TargetStore for InMemoryStore {
    fn table_names(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.keys().cloned().collect())
    }

    fn read_table(&self, table: &str) -> Result<TableData> {
        if self.read_fails(table) {
            return Err(EngineError::TransientInfra {
                operation: format!("read {table}"),
                message: "table is unavailable".to_string(),
            });
        }
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }

    fn get(&self, table: &str, record_id: &str) -> Result<Option<Record>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).and_then(|t| t.get(record_id)).cloned())
    }

    fn upsert(&self, table: &str, record_id: &str, record: Record) -> Result<()> {
        if self.take_write_fault(table, record_id) {
            return Err(EngineError::TransientInfra {
                operation: format!("write {table}/{record_id}"),
                message: "connection reset".to_string(),
            });
        }
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(record_id.to_string(), record);
        debug!(table, record_id, "upserted record");
        Ok(())
    }

    fn remove(&self, table: &str, record_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        Ok(tables
            .get_mut(table)
            .is_some_and(|t| t.remove(record_id).is_some()))
    }

    fn replace_table(&self, table: &str, data: TableData) -> Result<()> {
        if self.replace_fails(table) {
            return Err(EngineError::TransientInfra {
                operation: format!("replace {table}"),
                message: "table is unavailable".to_string(),
            });
        }
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(table.to_string(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use edm_model::CellValue;

    use super::*;

    #[test]
    fn upsert_is_idempotent_per_record_id() {
        let store = InMemoryStore::new();
        let record = Record::from([("mrn".to_string(), CellValue::text("A1"))]);
        store.upsert("patients", "b:1", record.clone()).expect("write");
        store.upsert("patients", "b:1", record).expect("replay");
        assert_eq!(store.row_count("patients"), 1);
    }

    #[test]
    fn scheduled_write_faults_are_transient() {
        let store = InMemoryStore::new();
        store.fail_writes("patients", "b:1", 1);
        let error = store
            .upsert("patients", "b:1", Record::new())
            .unwrap_err();
        assert!(error.kind().is_retryable());
        store.upsert("patients", "b:1", Record::new()).expect("second attempt");
    }
}
