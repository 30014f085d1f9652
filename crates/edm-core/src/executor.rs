//! Migration executor.
//!
//! A batch leases its target tables, passes the snapshot barrier, then
//! processes rows in resumable chunks on a bounded worker pool. Every row ends
//! committed, queued for retry, or permanently failed with a [`RowFailure`].
//! Once no row is pending the batch is deduplicated, scored and given its
//! terminal status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use edm_model::{
    BatchId, BatchStatus, ConfirmedMappings, Dataset, DedupCandidate, EngineConfig, EngineError,
    ErrorKind, ExecutionOptions, ExecutorSettings, LineageRecord, MigrationBatch, QualityScore,
    Record, Result, RetryId, RetryQueueItem, RetryStatus, RowFailure, SnapshotType, SourceRow,
    TargetColumn, TargetSchema, TransformStep,
};
use edm_transform::{check_required, is_canonical, transform_value};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::dedupe::{DedupEngine, DedupRules};
use crate::lineage::LineageTracker;
use crate::lock::{TableLease, TableLockRegistry};
use crate::quality::{QualityMetrics, QualityScorer};
use crate::retry::{RetryOutcome, RetryQueue, RetryRequest};
use crate::snapshot::SnapshotManager;
use crate::store::TargetStore;

/// Lease holder used while the retry queue is drained.
const RETRY_PROCESSOR: &str = "retry-processor";

fn poisoned() -> EngineError {
    EngineError::Storage {
        message: "batch registry lock poisoned".to_string(),
    }
}

/// Cooperative cancellation, checked before each row.
///
/// Rows already committed stay committed; only a snapshot rollback reverts
/// them.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Row counters updated by worker threads while a step runs.
#[derive(Debug, Default)]
pub struct LiveCounters {
    pub processed: AtomicU64,
    pub committed: AtomicU64,
    pub failed: AtomicU64,
    pub queued: AtomicU64,
}

/// A row whose writes wait on the retry queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingRow {
    /// Retry items that have not reached a terminal status.
    pub retry_ids: Vec<RetryId>,
    /// `(table, record_id)` writes that already landed.
    pub written: Vec<(String, String)>,
    /// Lineage to append once the row commits.
    pub lineage: Vec<LineageRecord>,
    /// Set when any retry item was exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RowFailure>,
}

/// Everything the executor keeps about one batch. Serializable so a later
/// process can reconcile retries against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub batch: MigrationBatch,
    pub options: ExecutionOptions,
    /// Target tables the confirmed mappings write to.
    #[serde(default)]
    pub tables: BTreeSet<String>,
    #[serde(default)]
    pub failures: Vec<RowFailure>,
    /// Record ids written per target table.
    #[serde(default)]
    pub written: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub pending_rows: BTreeMap<u64, PendingRow>,
    #[serde(default)]
    pub metrics: QualityMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScore>,
    /// Set once every source row has been processed.
    #[serde(default)]
    pub run_complete: bool,
}

impl BatchState {
    fn new(batch: MigrationBatch, options: ExecutionOptions, tables: &[String]) -> Self {
        Self {
            batch,
            options,
            tables: tables.iter().cloned().collect(),
            failures: Vec::new(),
            written: BTreeMap::new(),
            pending_rows: BTreeMap::new(),
            metrics: QualityMetrics::default(),
            quality: None,
            run_complete: false,
        }
    }

    /// Every table the batch may still write, including tables only touched
    /// by rows that wait on retries.
    fn touched_tables(&self) -> BTreeSet<String> {
        let mut tables = self.tables.clone();
        tables.extend(self.written.keys().cloned());
        for pending in self.pending_rows.values() {
            tables.extend(pending.written.iter().map(|(table, _)| table.clone()));
        }
        tables
    }

    /// Open, non-dry-run batches keep a claim on their tables so a rollback
    /// cannot restore them underneath queued retries.
    fn holds_claim(&self) -> bool {
        !self.batch.status.is_terminal() && !self.options.dry_run
    }
}

/// Durable executor state: batches, retry queue, dedup candidates and lineage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorState {
    pub batches: Vec<BatchState>,
    pub retry_items: Vec<RetryQueueItem>,
    pub dedup_candidates: Vec<DedupCandidate>,
    pub lineage: Vec<LineageRecord>,
}

/// Snapshot of a batch's progress between steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub pending_count: u64,
}

/// Outcome of one retry-processing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryReport {
    pub outcomes: Vec<RetryOutcome>,
    pub finalized: Vec<(BatchId, BatchStatus)>,
}

#[derive(Debug, Clone)]
struct CellPlan {
    source_column: String,
    target_column: String,
    column: TargetColumn,
}

#[derive(Debug, Clone)]
struct TablePlan {
    table: String,
    cells: Vec<CellPlan>,
}

/// Validated, per-table view of the confirmed mappings.
#[derive(Debug, Clone)]
struct RowPlan {
    tables: Vec<TablePlan>,
}

impl RowPlan {
    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }
}

fn not_confirmed(reason: impl Into<String>) -> EngineError {
    EngineError::NotConfirmed {
        reason: reason.into(),
    }
}

/// Re-checks confirmed mappings against the executor's schema and the dataset.
fn plan_rows(
    schema: &TargetSchema,
    dataset: &Dataset,
    confirmed: &ConfirmedMappings,
) -> Result<RowPlan> {
    if confirmed.schema_version() != schema.version_key() {
        return Err(not_confirmed(format!(
            "mappings were confirmed against {} but the target schema is {}",
            confirmed.schema_version(),
            schema.version_key()
        )));
    }
    if confirmed.confirmation().confirmed_by.trim().is_empty() {
        return Err(not_confirmed("confirmation carries no approver"));
    }
    if confirmed.source_file() != dataset.source_file {
        return Err(not_confirmed(format!(
            "mappings were confirmed for {} but the dataset is {}",
            confirmed.source_file(),
            dataset.source_file
        )));
    }

    let mut seen = BTreeSet::new();
    let mut tables: BTreeMap<String, Vec<CellPlan>> = BTreeMap::new();
    for mapping in confirmed.active() {
        let (table, target) = (mapping.target_table(), mapping.target_column());
        let column = schema
            .column(table, target)
            .ok_or_else(|| not_confirmed(format!("unknown target column {table}.{target}")))?;
        if !seen.insert((table, target)) {
            return Err(not_confirmed(format!(
                "target column {table}.{target} is mapped more than once"
            )));
        }
        if !dataset.columns.iter().any(|c| c == mapping.source_column()) {
            return Err(EngineError::InvalidInput(format!(
                "source column '{}' is not present in {}",
                mapping.source_column(),
                dataset.source_file
            )));
        }
        tables.entry(table.to_string()).or_default().push(CellPlan {
            source_column: mapping.source_column().to_string(),
            target_column: target.to_string(),
            column: column.clone(),
        });
    }
    if tables.is_empty() {
        return Err(EngineError::InvalidInput(
            "confirmed mappings contain no active column".to_string(),
        ));
    }

    for (table, cells) in &tables {
        let Some(target) = schema.table(table) else {
            continue;
        };
        for (name, _) in target.required_columns() {
            if !cells.iter().any(|cell| &cell.target_column == name) {
                return Err(EngineError::InvalidInput(format!(
                    "required column {table}.{name} has no confirmed mapping"
                )));
            }
        }
    }

    Ok(RowPlan {
        tables: tables
            .into_iter()
            .map(|(table, cells)| TablePlan { table, cells })
            .collect(),
    })
}

struct RowContext<'a> {
    batch_id: &'a BatchId,
    source_file: &'a str,
    plan: &'a RowPlan,
    options: ExecutionOptions,
    cancel: &'a CancellationFlag,
    now: DateTime<Utc>,
}

impl RowContext<'_> {
    fn lineage(
        &self,
        row: u64,
        table: &str,
        cell: &CellPlan,
        transformations: Vec<TransformStep>,
        validation_passed: bool,
        record_id: Option<&str>,
    ) -> LineageRecord {
        LineageRecord {
            batch_id: self.batch_id.clone(),
            source_file: self.source_file.to_string(),
            source_row: row,
            source_column: cell.source_column.clone(),
            target_table: table.to_string(),
            target_column: cell.target_column.clone(),
            record_id: record_id.map(ToString::to_string),
            transformations,
            validation_passed,
            recorded_at: self.now,
        }
    }

    fn failure(
        &self,
        row: u64,
        source_column: Option<&str>,
        table: Option<&str>,
        rule: &str,
        message: impl Into<String>,
        kind: ErrorKind,
    ) -> RowFailure {
        RowFailure {
            batch_id: self.batch_id.clone(),
            source_row: row,
            source_column: source_column.map(ToString::to_string),
            target_table: table.map(ToString::to_string),
            rule: rule.to_string(),
            message: message.into(),
            kind,
            recorded_at: self.now,
        }
    }
}

enum RowOutcome {
    Committed {
        written: Vec<(String, String)>,
        lineage: Vec<LineageRecord>,
    },
    Pending {
        row: u64,
        pending: PendingRow,
    },
    Failed {
        failure: RowFailure,
        lineage: Vec<LineageRecord>,
    },
}

struct RowResult {
    outcome: RowOutcome,
    metrics: QualityMetrics,
}

/// Runs confirmed mappings against the target store.
#[derive(Clone)]
pub struct MigrationExecutor {
    schema: Arc<TargetSchema>,
    store: Arc<dyn TargetStore>,
    locks: TableLockRegistry,
    snapshots: Arc<SnapshotManager>,
    lineage: LineageTracker,
    retries: RetryQueue,
    dedup: DedupEngine,
    quality: QualityScorer,
    settings: ExecutorSettings,
    pool: Arc<ThreadPool>,
    batches: Arc<RwLock<BTreeMap<BatchId, BatchState>>>,
}

impl fmt::Debug for MigrationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationExecutor")
            .field("schema", &self.schema.version_key())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MigrationExecutor {
    pub fn new(
        schema: Arc<TargetSchema>,
        store: Arc<dyn TargetStore>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::with_state(schema, store, config, ExecutorState::default())
    }

    /// Restores an executor from previously exported state.
    pub fn with_state(
        schema: Arc<TargetSchema>,
        store: Arc<dyn TargetStore>,
        config: &EngineConfig,
        state: ExecutorState,
    ) -> Result<Self> {
        let locks = TableLockRegistry::new();
        let snapshots = SnapshotManager::new(store.clone(), locks.clone(), config.snapshot.clone())?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.executor.worker_count)
            .thread_name(|i| format!("edm-worker-{i}"))
            .build()
            .map_err(|e| EngineError::InvalidInput(format!("cannot build worker pool: {e}")))?;
        for open in state.batches.iter().filter(|s| s.holds_claim()) {
            let mut tables = open.touched_tables();
            tables.extend(
                state
                    .retry_items
                    .iter()
                    .filter(|item| item.migration_batch_id == open.batch.batch_id)
                    .map(|item| item.target_table.clone()),
            );
            locks.claim(&tables, open.batch.batch_id.as_str())?;
        }
        let batches = state
            .batches
            .into_iter()
            .map(|s| (s.batch.batch_id.clone(), s))
            .collect();
        Ok(Self {
            schema,
            store,
            locks,
            snapshots: Arc::new(snapshots),
            lineage: LineageTracker::from_records(state.lineage),
            retries: RetryQueue::from_items(config.retry.clone(), state.retry_items),
            dedup: DedupEngine::from_candidates(config.dedup.clone(), state.dedup_candidates),
            quality: QualityScorer::new(config.quality.clone()),
            settings: config.executor.clone(),
            pool: Arc::new(pool),
            batches: Arc::new(RwLock::new(batches)),
        })
    }

    pub fn export_state(&self) -> ExecutorState {
        ExecutorState {
            batches: self.batch_states(),
            retry_items: self.retries.items(),
            dedup_candidates: self.dedup.candidates(),
            lineage: self.lineage.records(),
        }
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    pub fn locks(&self) -> &TableLockRegistry {
        &self.locks
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn lineage(&self) -> &LineageTracker {
        &self.lineage
    }

    pub fn retries(&self) -> &RetryQueue {
        &self.retries
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<MigrationBatch> {
        self.batch_state(batch_id).map(|s| s.batch)
    }

    pub fn batch_state(&self, batch_id: &BatchId) -> Option<BatchState> {
        self.batches.read().ok()?.get(batch_id).cloned()
    }

    /// Batches ordered by start time.
    pub fn batches(&self) -> Vec<MigrationBatch> {
        self.batch_states().into_iter().map(|s| s.batch).collect()
    }

    fn batch_states(&self) -> Vec<BatchState> {
        let mut states: Vec<BatchState> = self
            .batches
            .read()
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        states.sort_by_key(|s| s.batch.started_at);
        states
    }

    pub fn failures(&self, batch_id: &BatchId) -> Vec<RowFailure> {
        self.batch_state(batch_id)
            .map(|s| s.failures)
            .unwrap_or_default()
    }

    pub fn quality(&self, batch_id: &BatchId) -> Option<QualityScore> {
        self.batch_state(batch_id).and_then(|s| s.quality)
    }

    /// Validates the request, leases the target tables and passes the
    /// snapshot barrier. No row is written before this returns.
    ///
    /// A snapshot failure records the batch as `FAILED` and returns
    /// [`EngineError::Snapshot`].
    pub fn start(
        &self,
        dataset: Dataset,
        confirmed: &ConfirmedMappings,
        options: ExecutionOptions,
    ) -> Result<BatchRun> {
        let plan = plan_rows(&self.schema, &dataset, confirmed)?;
        let tables = plan.table_names();
        let batch_id = BatchId::generate();
        let source_system = dataset
            .source_system
            .clone()
            .unwrap_or_else(|| dataset.source_type.clone());
        let mut batch = MigrationBatch::start(
            batch_id.clone(),
            source_system,
            dataset.source_file.clone(),
            self.schema.version_key(),
            dataset.row_count() as u64,
            options.dry_run,
        );

        let lease = if options.dry_run {
            None
        } else {
            Some(self.locks.acquire(&tables, batch_id.as_str())?)
        };

        if options.create_pre_migration_snapshot && !options.dry_run {
            let start = Instant::now();
            let name = format!("pre-migration {batch_id}");
            match self.snapshots.create_snapshot(
                &tables,
                &name,
                SnapshotType::PreMigration,
                Some(&batch_id),
            ) {
                Ok(snapshot) => {
                    info!(
                        %batch_id,
                        snapshot_id = %snapshot.snapshot_id,
                        duration_ms = start.elapsed().as_millis(),
                        "snapshot barrier passed"
                    );
                    batch.snapshot_id = Some(snapshot.snapshot_id.to_string());
                }
                Err(error) => {
                    warn!(%batch_id, %error, "snapshot failed, aborting batch");
                    batch.abort(error.to_string(), Utc::now())?;
                    self.insert_state(BatchState::new(batch, options, &tables))?;
                    return Err(match error {
                        EngineError::Snapshot { .. } => error,
                        other => EngineError::Snapshot {
                            batch_id: Some(batch_id.to_string()),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            %batch_id,
            source_system = %batch.source_system,
            rows = batch.record_count,
            tables = ?tables,
            status = %batch.status,
            "batch started"
        );
        if !options.dry_run {
            self.locks.claim(&tables, batch_id.as_str())?;
        }
        self.insert_state(BatchState::new(batch, options, &tables))?;

        Ok(BatchRun {
            executor: self.clone(),
            batch_id,
            dataset,
            plan,
            options,
            cursor: 0,
            cancel: CancellationFlag::new(),
            live: Arc::new(LiveCounters::default()),
            _lease: lease,
        })
    }

    /// Runs a batch to the end of its rows.
    ///
    /// The returned batch is `PROCESSING` when rows still wait on the retry
    /// queue; [`MigrationExecutor::process_retries`] finalizes it later.
    pub fn execute(
        &self,
        dataset: Dataset,
        confirmed: &ConfirmedMappings,
        options: ExecutionOptions,
    ) -> Result<MigrationBatch> {
        let mut run = self.start(dataset, confirmed, options)?;
        run.run_to_completion()
    }

    fn insert_state(&self, state: BatchState) -> Result<()> {
        self.batches
            .write()
            .map_err(|_| poisoned())?
            .insert(state.batch.batch_id.clone(), state);
        Ok(())
    }

    fn process_row(&self, ctx: &RowContext<'_>, row: &SourceRow) -> RowResult {
        let mut metrics = QualityMetrics::default();
        if ctx.cancel.is_cancelled() {
            let failure = ctx.failure(
                row.number,
                None,
                None,
                "cancelled",
                "batch was cancelled before the row was processed",
                ErrorKind::Cancelled,
            );
            return RowResult {
                outcome: RowOutcome::Failed {
                    failure,
                    lineage: Vec::new(),
                },
                metrics,
            };
        }

        let record_id = format!("{}:{}", ctx.batch_id, row.number);
        let mut prepared: Vec<(&str, Record, Vec<LineageRecord>)> = Vec::new();
        for table in &ctx.plan.tables {
            let mut record = Record::new();
            let mut lineage = Vec::with_capacity(table.cells.len());
            for cell in &table.cells {
                let raw = row.get(&cell.source_column);
                if cell.column.required {
                    metrics.required_cells += 1;
                    if raw.is_null() {
                        metrics.required_missing += 1;
                    }
                }
                let transformed = check_required(&cell.column, raw)
                    .and_then(|()| transform_value(cell.column.semantic_type, raw));
                match transformed {
                    Ok(outcome) => {
                        if !outcome.value.is_null() {
                            metrics.cells_checked += 1;
                            if is_canonical(cell.column.semantic_type, &outcome.value) {
                                metrics.cells_canonical += 1;
                            }
                        }
                        lineage.push(ctx.lineage(
                            row.number,
                            &table.table,
                            cell,
                            outcome.steps,
                            true,
                            Some(record_id.as_str()),
                        ));
                        record.insert(cell.target_column.clone(), outcome.value);
                    }
                    Err(failure) => {
                        metrics.rows_failed += 1;
                        debug!(
                            batch_id = %ctx.batch_id,
                            row = row.number,
                            column = %cell.source_column,
                            rule = failure.rule,
                            "row failed validation"
                        );
                        let lineage = vec![ctx.lineage(
                            row.number,
                            &table.table,
                            cell,
                            vec![TransformStep::new(failure.rule, failure.message.clone())],
                            false,
                            None,
                        )];
                        let failure = ctx.failure(
                            row.number,
                            Some(cell.source_column.as_str()),
                            Some(table.table.as_str()),
                            failure.rule,
                            failure.message,
                            ErrorKind::Validation,
                        );
                        return RowResult {
                            outcome: RowOutcome::Failed { failure, lineage },
                            metrics,
                        };
                    }
                }
            }
            prepared.push((table.table.as_str(), record, lineage));
        }
        metrics.rows_valid += 1;

        if ctx.options.dry_run {
            return RowResult {
                outcome: RowOutcome::Committed {
                    written: Vec::new(),
                    lineage: Vec::new(),
                },
                metrics,
            };
        }

        let attempts: Vec<_> = prepared
            .into_iter()
            .map(|(table, record, lineage)| {
                let result = self.store.upsert(table, &record_id, record.clone());
                (table, record, lineage, result)
            })
            .collect();

        let retryable = |error: &EngineError| {
            error.kind().is_retryable() && ctx.options.enable_retry_logic
        };
        let permanent = attempts.iter().find_map(|(table, _, _, result)| match result {
            Err(error) if !retryable(error) => Some((*table, error.clone())),
            _ => None,
        });
        if let Some((table, error)) = permanent {
            self.undo_writes(
                attempts
                    .iter()
                    .filter(|(_, _, _, r)| r.is_ok())
                    .map(|(t, _, _, _)| (*t, record_id.as_str())),
            );
            let failure = ctx.failure(
                row.number,
                None,
                Some(table),
                "write",
                error.to_string(),
                error.kind(),
            );
            return RowResult {
                outcome: RowOutcome::Failed {
                    failure,
                    lineage: Vec::new(),
                },
                metrics,
            };
        }

        let mut pending = PendingRow::default();
        let mut enqueue_error = None;
        for (table, record, lineage, result) in attempts {
            match result {
                Ok(()) => {
                    pending.written.push((table.to_string(), record_id.clone()));
                    pending.lineage.extend(lineage);
                }
                Err(error) => {
                    let request = RetryRequest {
                        batch_id: ctx.batch_id.clone(),
                        failed_operation: format!("upsert {table}"),
                        operation_key: format!("{}:{table}:{}", ctx.batch_id, row.number),
                        target_table: table.to_string(),
                        source_row_numbers: vec![row.number],
                        record_id: record_id.clone(),
                        payload: record,
                        lineage,
                        error,
                    };
                    match self.retries.enqueue(request, ctx.now) {
                        Ok(item) => pending.retry_ids.push(item.retry_id),
                        Err(error) => enqueue_error = Some((table, error)),
                    }
                }
            }
        }

        if let Some((table, error)) = enqueue_error {
            self.undo_writes(pending.written.iter().map(|(t, id)| (t.as_str(), id.as_str())));
            let failure = ctx.failure(
                row.number,
                None,
                Some(table),
                "retry.enqueue",
                error.to_string(),
                error.kind(),
            );
            return RowResult {
                outcome: RowOutcome::Failed {
                    failure,
                    lineage: Vec::new(),
                },
                metrics,
            };
        }

        let outcome = if pending.retry_ids.is_empty() {
            RowOutcome::Committed {
                written: pending.written,
                lineage: pending.lineage,
            }
        } else {
            RowOutcome::Pending {
                row: row.number,
                pending,
            }
        };
        RowResult { outcome, metrics }
    }

    /// Best-effort removal of a failed row's partial writes.
    fn undo_writes<'a>(&self, writes: impl Iterator<Item = (&'a str, &'a str)>) {
        for (table, record_id) in writes {
            if let Err(error) = self.store.remove(table, record_id) {
                warn!(table, record_id, %error, "could not undo partial row write");
            }
        }
    }

    /// Folds a step's row results into the batch. Single writer.
    fn absorb(&self, batch_id: &BatchId, results: Vec<RowResult>) -> Result<()> {
        let mut lineage = Vec::new();
        let lineage_enabled = {
            let mut batches = self.batches.write().map_err(|_| poisoned())?;
            let state = batches
                .get_mut(batch_id)
                .ok_or_else(|| EngineError::not_found("batch", batch_id.as_str()))?;
            for result in results {
                state.metrics.merge(&result.metrics);
                match result.outcome {
                    RowOutcome::Committed {
                        written,
                        lineage: cells,
                    } => {
                        state.batch.success_count += 1;
                        state.metrics.records_written += written.len() as u64;
                        for (table, record_id) in written {
                            state.written.entry(table).or_default().insert(record_id);
                        }
                        lineage.extend(cells);
                    }
                    RowOutcome::Pending { row, pending } => {
                        state.batch.pending_count += 1;
                        state.pending_rows.insert(row, pending);
                    }
                    RowOutcome::Failed {
                        failure,
                        lineage: cells,
                    } => {
                        state.batch.error_count += 1;
                        state.failures.push(failure);
                        lineage.extend(cells);
                    }
                }
            }
            state.options.enable_lineage_tracking
        };
        if lineage_enabled {
            self.lineage.extend(lineage);
        }
        Ok(())
    }

    fn mark_run_complete(&self, batch_id: &BatchId) -> Result<()> {
        let mut batches = self.batches.write().map_err(|_| poisoned())?;
        if let Some(state) = batches.get_mut(batch_id) {
            state.run_complete = true;
        }
        Ok(())
    }

    /// Deduplicates, scores and closes a batch whose rows are all resolved.
    /// Returns `None` while rows are still pending.
    fn finalize_if_ready(
        &self,
        batch_id: &BatchId,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchStatus>> {
        let (options, written) = {
            let batches = self.batches.read().map_err(|_| poisoned())?;
            let state = batches
                .get(batch_id)
                .ok_or_else(|| EngineError::not_found("batch", batch_id.as_str()))?;
            if state.batch.status.is_terminal() {
                return Ok(Some(state.batch.status));
            }
            if !state.run_complete || !state.pending_rows.is_empty() {
                return Ok(None);
            }
            (state.options, state.written.clone())
        };

        if options.enable_deduplication && !options.dry_run {
            let start = Instant::now();
            for (table, ids) in &written {
                let Some(target) = self.schema.table(table) else {
                    continue;
                };
                let rules = DedupRules::for_table(target);
                if rules.is_empty() {
                    continue;
                }
                self.dedup
                    .scan(batch_id, table, &rules, ids, self.store.as_ref(), now)?;
            }
            debug!(%batch_id, duration_ms = start.elapsed().as_millis(), "dedup stage finished");
        }
        let pending_candidates = self.dedup.pending_for_batch(batch_id).len();
        let pending_records = self.dedup.pending_record_count(batch_id) as u64;

        let mut batches = self.batches.write().map_err(|_| poisoned())?;
        let state = batches
            .get_mut(batch_id)
            .ok_or_else(|| EngineError::not_found("batch", batch_id.as_str()))?;
        state.metrics.pending_duplicate_records = pending_records;
        if options.enable_quality_scoring {
            state.quality = Some(self.quality.score_metrics(
                batch_id,
                &state.metrics,
                pending_candidates,
                now,
            ));
        }
        let status = if state.batch.error_count == 0 && pending_candidates == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::CompletedWithErrors
        };
        state.batch.finalize(status, now)?;
        self.locks.release_claim(batch_id.as_str())?;
        info!(
            %batch_id,
            %status,
            success = state.batch.success_count,
            errors = state.batch.error_count,
            duplicates = pending_candidates,
            "batch finished"
        );
        Ok(Some(status))
    }

    /// Drains due retry items, then settles the rows and batches they belong to.
    ///
    /// Each target table is leased on its own; items for a table that is busy
    /// stay queued for the next pass.
    pub fn process_retries(&self, now: DateTime<Utc>) -> Result<RetryReport> {
        let due_tables: BTreeSet<String> = self
            .retries
            .pending()
            .into_iter()
            .filter(|item| item.is_due(now))
            .map(|item| item.target_table)
            .collect();

        let mut leases = Vec::with_capacity(due_tables.len());
        for table in &due_tables {
            match self.locks.acquire([table], RETRY_PROCESSOR) {
                Ok(lease) => leases.push(lease),
                Err(error) => warn!(table, %error, "deferring retries for busy table"),
            }
        }
        let leased: BTreeSet<&str> = leases
            .iter()
            .flat_map(|lease| lease.tables().iter().map(String::as_str))
            .collect();

        let outcomes = if leased.is_empty() {
            Vec::new()
        } else {
            let store = self.store.clone();
            let outcomes = self.retries.process_due_matching(
                now,
                |item| leased.contains(item.target_table.as_str()),
                |item| store.upsert(&item.target_table, &item.record_id, item.payload.clone()),
            )?;
            for outcome in outcomes.iter().filter(|o| o.status.is_terminal()) {
                self.reconcile(outcome, now)?;
            }
            outcomes
        };
        let deferred_tables = due_tables.len() - leased.len();
        drop(leases);

        let finalized = self.finalize_ready_batches(now)?;
        info!(
            processed = outcomes.len(),
            deferred_tables,
            finalized = finalized.len(),
            "retry pass finished"
        );
        Ok(RetryReport {
            outcomes,
            finalized,
        })
    }

    /// Applies one terminal retry outcome to the row that produced it.
    fn reconcile(&self, outcome: &RetryOutcome, now: DateTime<Utc>) -> Result<()> {
        let Some(item) = self.retries.get(&outcome.retry_id) else {
            return Ok(());
        };
        let mut lineage = Vec::new();
        let mut to_undo = Vec::new();
        let lineage_enabled = {
            let mut batches = self.batches.write().map_err(|_| poisoned())?;
            let Some(state) = batches.get_mut(&item.migration_batch_id) else {
                warn!(batch_id = %item.migration_batch_id, "retry item refers to an unknown batch");
                return Ok(());
            };
            for row in &item.source_row_numbers {
                let Some(pending) = state.pending_rows.get_mut(row) else {
                    continue;
                };
                pending.retry_ids.retain(|id| id != &item.retry_id);
                match outcome.status {
                    RetryStatus::Succeeded => {
                        pending
                            .written
                            .push((item.target_table.clone(), item.record_id.clone()));
                        pending.lineage.extend(item.lineage.iter().cloned());
                    }
                    RetryStatus::Exhausted if pending.failure.is_none() => {
                        pending.failure = Some(RowFailure {
                            batch_id: item.migration_batch_id.clone(),
                            source_row: *row,
                            source_column: None,
                            target_table: Some(item.target_table.clone()),
                            rule: "retry.exhausted".to_string(),
                            message: format!(
                                "gave up after {} attempts: {}",
                                item.attempt_number, item.error_message
                            ),
                            kind: ErrorKind::TransientInfra,
                            recorded_at: now,
                        });
                    }
                    _ => {}
                }
                if !pending.retry_ids.is_empty() {
                    continue;
                }
                let Some(settled) = state.pending_rows.remove(row) else {
                    continue;
                };
                state.batch.pending_count = state.batch.pending_count.saturating_sub(1);
                match settled.failure {
                    None => {
                        state.batch.success_count += 1;
                        state.metrics.records_written += settled.written.len() as u64;
                        for (table, record_id) in settled.written {
                            state.written.entry(table).or_default().insert(record_id);
                        }
                        lineage.extend(settled.lineage);
                    }
                    Some(failure) => {
                        state.batch.error_count += 1;
                        state.failures.push(failure);
                        to_undo.extend(settled.written);
                    }
                }
            }
            state.options.enable_lineage_tracking
        };
        self.undo_writes(to_undo.iter().map(|(t, id)| (t.as_str(), id.as_str())));
        if lineage_enabled {
            self.lineage.extend(lineage);
        }
        Ok(())
    }

    /// Finalizes every open batch whose rows are all settled.
    fn finalize_ready_batches(&self, now: DateTime<Utc>) -> Result<Vec<(BatchId, BatchStatus)>> {
        let ready: Vec<(BatchId, Vec<String>)> = self
            .batches
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|s| {
                !s.batch.status.is_terminal() && s.run_complete && s.pending_rows.is_empty()
            })
            .map(|s| (s.batch.batch_id.clone(), s.written.keys().cloned().collect()))
            .collect();

        let mut finalized = Vec::new();
        for (batch_id, tables) in ready {
            let _lease = match self.locks.acquire(&tables, batch_id.as_str()) {
                Ok(lease) => lease,
                Err(error) => {
                    warn!(%batch_id, %error, "deferring batch finalization");
                    continue;
                }
            };
            if let Some(status) = self.finalize_if_ready(&batch_id, now)? {
                finalized.push((batch_id, status));
            }
        }
        Ok(finalized)
    }
}

/// A batch in progress. Holds the table lease until dropped.
pub struct BatchRun {
    executor: MigrationExecutor,
    batch_id: BatchId,
    dataset: Dataset,
    plan: RowPlan,
    options: ExecutionOptions,
    cursor: usize,
    cancel: CancellationFlag,
    live: Arc<LiveCounters>,
    _lease: Option<TableLease>,
}

impl fmt::Debug for BatchRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRun")
            .field("batch_id", &self.batch_id)
            .field("cursor", &self.cursor)
            .field("rows", &self.dataset.rows.len())
            .finish_non_exhaustive()
    }
}

impl BatchRun {
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Handle for cancelling the batch from another thread.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Counters that move while a step is running.
    pub fn live_counters(&self) -> Arc<LiveCounters> {
        self.live.clone()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.dataset.rows.len()
    }

    pub fn progress(&self) -> BatchProgress {
        let batch = self.executor.batch(&self.batch_id);
        let (status, success, errors, pending) = batch
            .map(|b| (b.status, b.success_count, b.error_count, b.pending_count))
            .unwrap_or((BatchStatus::Processing, 0, 0, 0));
        BatchProgress {
            batch_id: self.batch_id.clone(),
            status,
            total_rows: self.dataset.rows.len() as u64,
            processed_rows: self.cursor as u64,
            success_count: success,
            error_count: errors,
            pending_count: pending,
        }
    }

    /// Processes up to `max_rows` further rows on the worker pool.
    ///
    /// After the last row the batch is finalized unless rows wait on retries.
    pub fn step(&mut self, max_rows: usize) -> Result<BatchProgress> {
        let span = info_span!(
            "batch",
            batch_id = %self.batch_id,
            source_file = %self.dataset.source_file
        );
        let _guard = span.enter();

        let total = self.dataset.rows.len();
        if self.cursor < total {
            let start = Instant::now();
            let end = self.cursor.saturating_add(max_rows.max(1)).min(total);
            let ctx = RowContext {
                batch_id: &self.batch_id,
                source_file: &self.dataset.source_file,
                plan: &self.plan,
                options: self.options,
                cancel: &self.cancel,
                now: Utc::now(),
            };
            let executor = &self.executor;
            let live = &self.live;
            let rows = &self.dataset.rows[self.cursor..end];
            let results: Vec<RowResult> = executor.pool.install(|| {
                rows.par_iter()
                    .map(|row| {
                        let result = executor.process_row(&ctx, row);
                        let counter = match result.outcome {
                            RowOutcome::Committed { .. } => &live.committed,
                            RowOutcome::Pending { .. } => &live.queued,
                            RowOutcome::Failed { .. } => &live.failed,
                        };
                        counter.fetch_add(1, Ordering::Relaxed);
                        live.processed.fetch_add(1, Ordering::Relaxed);
                        result
                    })
                    .collect()
            });
            executor.absorb(&self.batch_id, results)?;
            debug!(
                rows = end - self.cursor,
                processed = end,
                total,
                duration_ms = start.elapsed().as_millis(),
                "processed chunk"
            );
            self.cursor = end;
        }

        if self.is_exhausted() {
            self.executor.mark_run_complete(&self.batch_id)?;
            self.executor.finalize_if_ready(&self.batch_id, Utc::now())?;
        }
        Ok(self.progress())
    }

    /// Steps through the remaining rows in chunks of the configured size.
    pub fn run_to_completion(&mut self) -> Result<MigrationBatch> {
        let chunk = match self.executor.settings.chunk_size {
            0 => usize::MAX,
            n => n,
        };
        loop {
            self.step(chunk)?;
            if self.is_exhausted() {
                break;
            }
        }
        self.executor
            .batch(&self.batch_id)
            .ok_or_else(|| EngineError::not_found("batch", self.batch_id.as_str()))
    }
}

impl Drop for BatchRun {
    /// An abandoned run can never finalize, so it gives up its claim and the
    /// tables become eligible for rollback again.
    fn drop(&mut self) {
        if self.is_exhausted() || self.options.dry_run {
            return;
        }
        warn!(
            batch_id = %self.batch_id,
            processed = self.cursor,
            total = self.dataset.rows.len(),
            "batch run dropped before its last row"
        );
        if let Err(error) = self.executor.locks.release_claim(self.batch_id.as_str()) {
            warn!(batch_id = %self.batch_id, %error, "could not release table claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use edm_model::{SemanticType, TargetTable};

    use super::*;
    use crate::store::InMemoryStore;

    fn schema() -> TargetSchema {
        TargetSchema::new("mini", "1").with_table(
            "staff",
            TargetTable::default()
                .with_column("email", TargetColumn::new(SemanticType::Email).required())
                .with_column("phone", TargetColumn::new(SemanticType::Phone)),
        )
    }

    fn dataset() -> Dataset {
        Dataset::from_text_rows(
            "staff.csv",
            "csv",
            vec![
                vec![("mail", "a@clinic.org"), ("tel", "555-123-4567")],
                vec![("mail", "b@clinic.org"), ("tel", "")],
            ],
        )
    }

    #[test]
    fn unconfirmed_schema_version_is_rejected() {
        let other = TargetSchema::new("mini", "2").with_table(
            "staff",
            TargetTable::default()
                .with_column("email", TargetColumn::new(SemanticType::Email).required()),
        );
        let mut session = edm_model::ReviewSession::new(&other, "staff.csv");
        session
            .attach_suggestions(vec![edm_model::MappingSuggestion {
                source_column: "mail".to_string(),
                target_table: "staff".to_string(),
                target_column: "email".to_string(),
                confidence: 0.9,
                reasons: Vec::new(),
                alternative_mappings: Vec::new(),
                source_pattern: edm_model::PatternKind::Email,
            }])
            .expect("attach");
        session.begin_review().expect("review");
        let confirmed = session.confirm("lead@clinic").expect("confirm");

        let error = plan_rows(&schema(), &dataset(), &confirmed).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotConfirmed);
    }

    #[test]
    fn cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let handle = flag.clone();
        handle.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn pending_row_state_round_trips_through_json() {
        let store: Arc<dyn TargetStore> = Arc::new(InMemoryStore::new());
        let executor =
            MigrationExecutor::new(Arc::new(schema()), store, &EngineConfig::default())
                .expect("executor");
        let mut state = BatchState::new(
            MigrationBatch::start(BatchId::generate(), "legacy", "staff.csv", "mini@1", 1, false),
            ExecutionOptions::default(),
            &["staff".to_string()],
        );
        state.pending_rows.insert(
            1,
            PendingRow {
                retry_ids: vec![RetryId::generate()],
                written: vec![("staff".to_string(), "b:1".to_string())],
                lineage: Vec::new(),
                failure: None,
            },
        );
        executor.insert_state(state.clone()).expect("insert");

        let json = serde_json::to_string(&executor.export_state()).expect("serialize");
        let restored: ExecutorState = serde_json::from_str(&json).expect("parse");
        assert_eq!(restored.batches, vec![state]);
    }
}
