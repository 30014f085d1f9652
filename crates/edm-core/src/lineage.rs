//! Append-only cell lineage.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use edm_model::{BatchId, LineageRecord};

/// Thread-safe lineage log shared by the executor and retry reconciliation.
///
/// Records are never edited or removed once appended.
#[derive(Debug, Clone, Default)]
pub struct LineageTracker {
    records: Arc<RwLock<Vec<LineageRecord>>>,
}

impl LineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<LineageRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub fn record(&self, record: LineageRecord) {
        if let Ok(mut records) = self.records.write() {
            records.push(record);
        }
    }

    pub fn extend(&self, batch: impl IntoIterator<Item = LineageRecord>) {
        if let Ok(mut records) = self.records.write() {
            records.extend(batch);
        }
    }

    pub fn records(&self) -> Vec<LineageRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn records_for_batch(&self, batch_id: &BatchId) -> Vec<LineageRecord> {
        self.filtered(|r| &r.batch_id == batch_id)
    }

    /// Trail of one source row within a batch.
    pub fn records_for_row(&self, batch_id: &BatchId, source_row: u64) -> Vec<LineageRecord> {
        self.filtered(|r| &r.batch_id == batch_id && r.source_row == source_row)
    }

    /// Every source cell that fed `table.column`.
    pub fn records_for_target(&self, table: &str, column: &str) -> Vec<LineageRecord> {
        self.filtered(|r| r.target_table == table && r.target_column == column)
    }

    /// Rule ids applied per target column of a batch, in first-seen order.
    pub fn summary(&self, batch_id: &BatchId) -> BTreeMap<String, Vec<String>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in self.records_for_batch(batch_id) {
            let rules = result
                .entry(format!("{}.{}", record.target_table, record.target_column))
                .or_default();
            for step in &record.transformations {
                if !rules.contains(&step.rule_id) {
                    rules.push(step.rule_id.clone());
                }
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&LineageRecord) -> bool) -> Vec<LineageRecord> {
        self.records
            .read()
            .map(|records| records.iter().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use edm_model::TransformStep;

    use super::*;

    fn record(batch: &BatchId, row: u64, column: &str, rule: &str) -> LineageRecord {
        LineageRecord {
            batch_id: batch.clone(),
            source_file: "patients.csv".to_string(),
            source_row: row,
            source_column: column.to_string(),
            target_table: "patients".to_string(),
            target_column: column.to_string(),
            record_id: Some(format!("{batch}:{row}")),
            transformations: vec![TransformStep::new(rule, "")],
            validation_passed: true,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn queries_by_batch_row_and_target() {
        let tracker = LineageTracker::new();
        let batch = BatchId::generate();
        let other = BatchId::generate();
        tracker.extend([
            record(&batch, 1, "phone", "phone.e164"),
            record(&batch, 2, "phone", "phone.e164"),
            record(&batch, 2, "birth_date", "date.iso8601"),
            record(&other, 1, "phone", "phone.e164"),
        ]);

        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.records_for_batch(&batch).len(), 3);
        assert_eq!(tracker.records_for_row(&batch, 2).len(), 2);
        assert_eq!(tracker.records_for_target("patients", "phone").len(), 3);
        assert_eq!(
            tracker.summary(&batch).get("patients.phone"),
            Some(&vec!["phone.e164".to_string()])
        );
    }
}
