use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use edm_cli::io::read_csv_dataset;
use edm_cli::logging::redact_value;
use edm_cli::state::{OpenedEngine, StateDir};
use edm_config::{
    load_engine_config_or_default, load_target_schema, schemas_root, validate_engine_config,
};
use edm_core::write_json_atomic;
use edm_model::{
    BatchId, BatchStatus, ConfirmedMappings, EngineConfig, ExecutionOptions, MigrationBatch,
    TargetSchema,
};
use tracing::{debug, info, info_span, warn};

use crate::cli::{
    Cli, DuplicatesArgs, LineageArgs, MigrateArgs, ResolveArgs, RetryArgs, ReviewArgs,
    RollbackArgs, SnapshotArgs, SourceArgs, StatusArgs,
};
use crate::summary::{
    print_batch, print_batches, print_candidates, print_confirmed, print_lineage,
    print_lineage_summary, print_profile, print_retry_report, print_rollback, print_schema,
    print_snapshot, print_snapshots, print_suggestions,
};
use crate::types::Outcome;

const DEFAULT_SCHEMA_FILE: &str = "clinic.toml";

/// Resolved global inputs shared by every command.
pub struct Workspace {
    pub state: StateDir,
    pub schema: TargetSchema,
    pub config: EngineConfig,
}

impl Workspace {
    pub fn load(cli: &Cli) -> Result<Self> {
        let schema_path = cli
            .schema
            .clone()
            .unwrap_or_else(|| schemas_root().join(DEFAULT_SCHEMA_FILE));
        let schema = load_target_schema(&schema_path)
            .with_context(|| format!("load target schema: {}", schema_path.display()))?;
        let config = load_engine_config_or_default(cli.config.as_deref())
            .context("load engine config")?;
        let state = StateDir::open(&cli.state_dir)?;
        debug!(
            schema = %schema.version_key(),
            state_dir = %state.root().display(),
            "workspace loaded"
        );
        Ok(Self {
            state,
            schema,
            config,
        })
    }

    fn open(&self) -> Result<OpenedEngine> {
        self.state
            .open_engine(self.schema.clone(), self.config.clone())
    }
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn parse_batch_id(raw: &str) -> Result<BatchId> {
    BatchId::new(raw).with_context(|| format!("invalid batch id '{raw}'"))
}

pub fn run_profile(workspace: &Workspace, args: &SourceArgs) -> Result<Outcome> {
    let dataset = read_csv_dataset(&args.input, args.source_system.as_deref())?;
    let opened = workspace.open()?;
    let dna = opened.engine.profile(&dataset);
    print_profile(&dna);
    Ok(Outcome::Success)
}

pub fn run_suggest(workspace: &Workspace, args: &SourceArgs) -> Result<Outcome> {
    let dataset = read_csv_dataset(&args.input, args.source_system.as_deref())?;
    let opened = workspace.open()?;
    let report = opened.engine.suggest(&opened.engine.profile(&dataset));
    print_suggestions(&report);
    if report.unmapped_columns().is_empty() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::NeedsAttention)
    }
}

pub fn run_review(workspace: &Workspace, args: &ReviewArgs) -> Result<Outcome> {
    let span = info_span!("review", file = %args.source.input.display());
    let _guard = span.enter();
    let dataset = read_csv_dataset(&args.source.input, args.source.source_system.as_deref())?;
    let opened = workspace.open()?;
    let engine = &opened.engine;
    let reviewer = args.reviewer.as_deref().unwrap_or(&args.approver);

    let (_, report, mut session) = engine.start_review(&dataset)?;
    for entry in &args.overrides {
        session
            .override_mapping(
                engine.schema(),
                &entry.source_column,
                &entry.target_table,
                &entry.target_column,
                reviewer,
            )
            .with_context(|| format!("override {}", entry.source_column))?;
    }
    for column in &args.skips {
        session
            .skip(column, reviewer)
            .with_context(|| format!("skip {column}"))?;
    }
    let pending = session.pending_columns();
    if !pending.is_empty() {
        warn!(columns = ?pending, "columns still unmapped; map them with --set or --skip them");
    }
    let confirmed = session.confirm(&args.approver)?;
    write_json_atomic(&args.out, &confirmed)
        .with_context(|| format!("write mappings: {}", args.out.display()))?;
    info!(
        suggestions = report.suggestions.len(),
        overrides = args.overrides.len(),
        skips = args.skips.len(),
        out = %args.out.display(),
        "mappings confirmed"
    );
    print_confirmed(&confirmed);
    println!("Written: {}", args.out.display());
    Ok(Outcome::Success)
}

fn read_confirmed(path: &Path) -> Result<ConfirmedMappings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read mappings: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse mappings: {}", path.display()))
}

fn execution_options(args: &MigrateArgs) -> ExecutionOptions {
    let mut options = if args.dry_run {
        ExecutionOptions::dry_run()
    } else {
        ExecutionOptions::new()
    };
    if args.no_snapshot {
        options = options.with_snapshot(false);
    }
    if args.no_dedup {
        options = options.with_deduplication(false);
    }
    if args.no_lineage {
        options = options.with_lineage(false);
    }
    if args.no_quality {
        options = options.with_quality_scoring(false);
    }
    if args.no_retry {
        options = options.with_retry(false);
    }
    options
}

/// Clean terminal batches succeed, dry runs included; everything else needs
/// an operator.
fn batch_outcome(batch: &MigrationBatch) -> Outcome {
    match batch.status {
        BatchStatus::Completed => Outcome::Success,
        _ => Outcome::NeedsAttention,
    }
}

pub fn run_migrate(workspace: &Workspace, args: &MigrateArgs) -> Result<Outcome> {
    let span = info_span!("migrate", file = %args.source.input.display());
    let _guard = span.enter();
    let started = Instant::now();

    let mut config = workspace.config.clone();
    if let Some(workers) = args.workers {
        config.executor.worker_count = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.executor.chunk_size = chunk_size;
    }
    validate_engine_config(&config).context("invalid executor overrides")?;

    let dataset = read_csv_dataset(&args.source.input, args.source.source_system.as_deref())?;
    if let Some(first) = dataset.rows.first() {
        for (column, value) in &first.cells {
            if let Some(text) = value.as_text() {
                debug!(column = %column, value = redact_value(&text), "first row");
            }
        }
    }
    let confirmed = read_confirmed(&args.mappings)?;
    let options = execution_options(args);
    let mut opened = workspace.state.open_engine(workspace.schema.clone(), config)?;

    let dna = opened.engine.profile(&dataset);
    let result = opened.engine.execute(dataset, &confirmed, options);
    // A failed batch is still recorded, so persist before reporting the error.
    workspace.state.save(&opened)?;
    let batch = result?;

    if !options.dry_run && batch.status != BatchStatus::Failed {
        let migration_id = args
            .migration_id
            .clone()
            .unwrap_or_else(|| batch.batch_id.to_string());
        let migration = opened
            .engine
            .record_history(&migration_id, &dna, &confirmed);
        let path = opened.history.save(&migration)?;
        debug!(path = %path.display(), "precedent saved");
    }

    let failures = opened.engine.failures(&batch.batch_id);
    let quality = opened.engine.quality(&batch.batch_id);
    let retries = opened.engine.retry_items(Some(&batch.batch_id));
    info!(
        batch_id = %batch.batch_id,
        status = %batch.status,
        success = batch.success_count,
        errors = batch.error_count,
        pending = batch.pending_count,
        duration_ms = duration_ms(started),
        "migration finished"
    );
    print_batch(&batch, &failures, quality.as_ref(), &retries);
    let pending_duplicates = opened
        .engine
        .dedup_candidates(Some(&batch.batch_id))
        .into_iter()
        .filter(|c| c.resolution.is_pending())
        .count();
    if pending_duplicates > 0 {
        println!(
            "{pending_duplicates} duplicate candidate(s) need review: edm duplicates --batch {}",
            batch.batch_id
        );
    }
    Ok(batch_outcome(&batch))
}

pub fn run_retry(workspace: &Workspace, args: &RetryArgs) -> Result<Outcome> {
    let started = Instant::now();
    let opened = workspace.open()?;
    let now = args.at.unwrap_or_else(Utc::now);
    let result = opened.engine.process_retries(now);
    workspace.state.save(&opened)?;
    let report = result?;
    info!(
        processed = report.outcomes.len(),
        finalized = report.finalized.len(),
        duration_ms = duration_ms(started),
        "retry pass finished"
    );
    let remaining = opened.engine.retry_items(None);
    print_retry_report(&report, &remaining);
    let needs_attention = remaining.iter().any(|item| !item.status.is_terminal())
        || report
            .finalized
            .iter()
            .any(|(_, status)| *status != BatchStatus::Completed);
    Ok(if needs_attention {
        Outcome::NeedsAttention
    } else {
        Outcome::Success
    })
}

pub fn run_snapshot(workspace: &Workspace, args: &SnapshotArgs) -> Result<Outcome> {
    let opened = workspace.open()?;
    let tables: Vec<String> = if args.tables.is_empty() {
        workspace.schema.tables.keys().cloned().collect()
    } else {
        args.tables.clone()
    };
    let snapshot = opened.engine.create_snapshot(&tables, &args.name)?;
    workspace.state.save(&opened)?;
    print_snapshot(&snapshot);
    Ok(Outcome::Success)
}

pub fn run_rollback(workspace: &Workspace, args: &RollbackArgs) -> Result<Outcome> {
    let span = info_span!("rollback", snapshot_id = %args.snapshot_id);
    let _guard = span.enter();
    let opened = workspace.open()?;
    let event = opened
        .engine
        .rollback(&args.snapshot_id, &args.reason, &args.approver)?;
    workspace.state.save(&opened)?;
    print_rollback(&event);
    Ok(Outcome::Success)
}

pub fn run_status(workspace: &Workspace, args: &StatusArgs) -> Result<Outcome> {
    let opened = workspace.open()?;
    let engine = &opened.engine;
    let Some(raw) = &args.batch_id else {
        print_batches(&engine.batches());
        print_snapshots(&engine.snapshots(), engine.rollback_events().len());
        return Ok(Outcome::Success);
    };
    let batch_id = parse_batch_id(raw)?;
    let batch = engine
        .batch(&batch_id)
        .ok_or_else(|| anyhow!("no batch {batch_id}"))?;
    let failures = engine.failures(&batch_id);
    let quality = engine.quality(&batch_id);
    let retries = engine.retry_items(Some(&batch_id));
    print_batch(&batch, &failures, quality.as_ref(), &retries);
    Ok(batch_outcome(&batch))
}

pub fn run_duplicates(workspace: &Workspace, args: &DuplicatesArgs) -> Result<Outcome> {
    let opened = workspace.open()?;
    let batch_id = args.batch_id.as_deref().map(parse_batch_id).transpose()?;
    let candidates: Vec<_> = opened
        .engine
        .dedup_candidates(batch_id.as_ref())
        .into_iter()
        .filter(|c| args.all || c.resolution.is_pending())
        .collect();
    print_candidates(&candidates);
    let pending = candidates.iter().any(|c| c.resolution.is_pending());
    Ok(if pending {
        Outcome::NeedsAttention
    } else {
        Outcome::Success
    })
}

pub fn run_resolve(workspace: &Workspace, args: &ResolveArgs) -> Result<Outcome> {
    let opened = workspace.open()?;
    let resolved = opened.engine.resolve_duplicate(
        &args.candidate_id,
        args.resolution.into(),
        &args.resolved_by,
    )?;
    workspace.state.save(&opened)?;
    print_candidates(std::slice::from_ref(&resolved));
    Ok(Outcome::Success)
}

pub fn run_lineage(workspace: &Workspace, args: &LineageArgs) -> Result<Outcome> {
    let opened = workspace.open()?;
    let batch_id = parse_batch_id(&args.batch_id)?;
    let lineage = opened.engine.executor().lineage();
    if args.summary {
        print_lineage_summary(&lineage.summary(&batch_id));
        return Ok(Outcome::Success);
    }
    let records = match args.row {
        Some(row) => lineage.records_for_row(&batch_id, row),
        None => lineage.records_for_batch(&batch_id),
    };
    print_lineage(&records);
    Ok(Outcome::Success)
}

pub fn run_schema(workspace: &Workspace) -> Result<Outcome> {
    print_schema(&workspace.schema);
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(status: BatchStatus, dry_run: bool) -> MigrationBatch {
        let mut batch = MigrationBatch::start(
            BatchId::generate(),
            "legacy-ehr",
            "patients.csv",
            "clinic@2024.1",
            0,
            dry_run,
        );
        if status.is_terminal() {
            batch.finalize(status, chrono::Utc::now()).expect("finalize");
        }
        batch
    }

    #[test]
    fn only_clean_batches_succeed() {
        assert_eq!(batch_outcome(&finished(BatchStatus::Completed, false)), Outcome::Success);
        assert_eq!(batch_outcome(&finished(BatchStatus::Completed, true)), Outcome::Success);
        assert_eq!(
            batch_outcome(&finished(BatchStatus::CompletedWithErrors, true)),
            Outcome::NeedsAttention
        );
        assert_eq!(
            batch_outcome(&finished(BatchStatus::Processing, false)),
            Outcome::NeedsAttention
        );
        assert_eq!(
            batch_outcome(&finished(BatchStatus::Failed, false)),
            Outcome::NeedsAttention
        );
    }
}
