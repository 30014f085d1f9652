//! Engine facade over profiling, mapping, execution and the operational read
//! interfaces.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use edm_map::{HistoricalMigration, MappingEngine, MappingReport};
use edm_model::{
    BatchId, ConfirmedMappings, Dataset, DedupCandidate, EngineConfig, EngineError, ExecutionOptions,
    LineageRecord, MigrationBatch, MigrationSnapshot, QualityScore, Resolution, Result,
    RetryQueueItem, ReviewSession, RollbackEvent, RowFailure, SnapshotType, SourceDna,
    TargetSchema,
};
use edm_profile::Profiler;
use tracing::info;

use crate::executor::{BatchRun, ExecutorState, MigrationExecutor, RetryReport};
use crate::store::TargetStore;

/// One object bundling the pipeline stages for a single target schema version.
#[derive(Debug)]
pub struct MigrationEngine {
    config: EngineConfig,
    profiler: Profiler,
    mapping: MappingEngine,
    executor: MigrationExecutor,
}

impl MigrationEngine {
    pub fn new(
        schema: TargetSchema,
        config: EngineConfig,
        store: Arc<dyn TargetStore>,
    ) -> Result<Self> {
        Self::with_state(schema, config, store, ExecutorState::default(), Vec::new())
    }

    /// Restores executor state and the precedent corpus from a previous run.
    pub fn with_state(
        schema: TargetSchema,
        config: EngineConfig,
        store: Arc<dyn TargetStore>,
        state: ExecutorState,
        history: Vec<HistoricalMigration>,
    ) -> Result<Self> {
        schema.validate()?;
        let executor =
            MigrationExecutor::with_state(Arc::new(schema.clone()), store, &config, state)?;
        Ok(Self {
            profiler: Profiler::new(config.profiler.clone()),
            mapping: MappingEngine::new(schema, config.mapping.clone(), history),
            executor,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &TargetSchema {
        self.executor.schema()
    }

    pub fn executor(&self) -> &MigrationExecutor {
        &self.executor
    }

    pub fn profile(&self, dataset: &Dataset) -> SourceDna {
        self.profiler.profile(dataset)
    }

    pub fn suggest(&self, dna: &SourceDna) -> MappingReport {
        self.mapping.suggest(dna)
    }

    /// Profiles and maps a dataset and opens a review session over the result.
    pub fn start_review(&self, dataset: &Dataset) -> Result<(SourceDna, MappingReport, ReviewSession)> {
        let dna = self.profile(dataset);
        let report = self.suggest(&dna);
        let mut session = ReviewSession::new(self.schema(), dataset.source_file.clone());
        session.attach_suggestions(report.suggestions.clone())?;
        session.begin_review()?;
        Ok((dna, report, session))
    }

    /// Adds a confirmed migration to the precedent corpus and returns it.
    pub fn record_history(
        &mut self,
        migration_id: &str,
        dna: &SourceDna,
        confirmed: &ConfirmedMappings,
    ) -> HistoricalMigration {
        let migration = HistoricalMigration::from_confirmed(migration_id, dna, confirmed);
        self.mapping.record_history(migration.clone());
        migration
    }

    pub fn execute(
        &self,
        dataset: Dataset,
        confirmed: &ConfirmedMappings,
        options: ExecutionOptions,
    ) -> Result<MigrationBatch> {
        self.executor.execute(dataset, confirmed, options)
    }

    /// Starts a batch for step-wise execution.
    pub fn start_batch(
        &self,
        dataset: Dataset,
        confirmed: &ConfirmedMappings,
        options: ExecutionOptions,
    ) -> Result<BatchRun> {
        self.executor.start(dataset, confirmed, options)
    }

    pub fn process_retries(&self, now: DateTime<Utc>) -> Result<RetryReport> {
        self.executor.process_retries(now)
    }

    /// Takes a manual snapshot while holding a lease on the tables, so no
    /// batch writes to them mid-capture.
    pub fn create_snapshot(&self, tables: &[String], name: &str) -> Result<MigrationSnapshot> {
        let _lease = self
            .executor
            .locks()
            .acquire(tables, &format!("snapshot:{name}"))?;
        self.executor
            .snapshots()
            .create_snapshot(tables, name, SnapshotType::Manual, None)
    }

    pub fn rollback(&self, snapshot_id: &str, reason: &str, approver: &str) -> Result<RollbackEvent> {
        self.executor
            .snapshots()
            .rollback(snapshot_id, reason, approver, Utc::now())
    }

    /// Resolves a duplicate candidate, merging records in the target table.
    pub fn resolve_duplicate(
        &self,
        candidate_id: &str,
        resolution: Resolution,
        resolved_by: &str,
    ) -> Result<DedupCandidate> {
        let candidate = self
            .executor
            .dedup()
            .get(candidate_id)
            .ok_or_else(|| EngineError::not_found("dedup candidate", candidate_id))?;
        let _lease = self
            .executor
            .locks()
            .acquire([candidate.target_table.as_str()], &format!("dedup:{candidate_id}"))?;
        let resolved = self.executor.dedup().resolve(
            candidate_id,
            resolution,
            resolved_by,
            self.executor.store().as_ref(),
            Utc::now(),
        )?;
        info!(candidate_id, %resolution, "duplicate resolved through engine");
        Ok(resolved)
    }

    pub fn batches(&self) -> Vec<MigrationBatch> {
        self.executor.batches()
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<MigrationBatch> {
        self.executor.batch(batch_id)
    }

    pub fn failures(&self, batch_id: &BatchId) -> Vec<RowFailure> {
        self.executor.failures(batch_id)
    }

    pub fn quality(&self, batch_id: &BatchId) -> Option<QualityScore> {
        self.executor.quality(batch_id)
    }

    /// Candidates of one batch, or all of them.
    pub fn dedup_candidates(&self, batch_id: Option<&BatchId>) -> Vec<DedupCandidate> {
        match batch_id {
            Some(id) => self.executor.dedup().for_batch(id),
            None => self.executor.dedup().candidates(),
        }
    }

    pub fn snapshots(&self) -> Vec<MigrationSnapshot> {
        self.executor.snapshots().list()
    }

    pub fn rollback_events(&self) -> Vec<RollbackEvent> {
        self.executor.snapshots().rollback_events()
    }

    pub fn retry_items(&self, batch_id: Option<&BatchId>) -> Vec<RetryQueueItem> {
        match batch_id {
            Some(id) => self.executor.retries().for_batch(id),
            None => self.executor.retries().items(),
        }
    }

    pub fn lineage(&self, batch_id: Option<&BatchId>) -> Vec<LineageRecord> {
        match batch_id {
            Some(id) => self.executor.lineage().records_for_batch(id),
            None => self.executor.lineage().records(),
        }
    }

    pub fn export_state(&self) -> ExecutorState {
        self.executor.export_state()
    }
}
