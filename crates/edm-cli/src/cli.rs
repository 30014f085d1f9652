//! Argument definitions for `edm`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use edm_model::Resolution;

#[derive(Parser)]
#[command(
    name = "edm",
    version,
    about = "Profile legacy exports and migrate them into a target schema",
    long_about = "Profile legacy tabular exports, suggest column mappings, and run\n\
                  human-confirmed migrations with snapshots, deduplication,\n\
                  quality scoring, retries and lineage."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Allow source cell values in log output.
    #[arg(long = "log-data", global = true)]
    pub log_data: bool,

    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Target schema declaration (TOML or JSON) [default: <schemas>/clinic.toml].
    #[arg(long = "schema", value_name = "PATH", global = true)]
    pub schema: Option<PathBuf>,

    /// Directory holding target tables, executor state, snapshots and history.
    #[arg(
        long = "state-dir",
        value_name = "DIR",
        default_value = ".edm",
        global = true
    )]
    pub state_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Profile a CSV export and print its column DNA.
    Profile(SourceArgs),

    /// Suggest target mappings for a CSV export.
    Suggest(SourceArgs),

    /// Review suggestions and write confirmed mappings.
    Review(ReviewArgs),

    /// Execute confirmed mappings against the target tables.
    Migrate(MigrateArgs),

    /// Process retry items that are due.
    Retry(RetryArgs),

    /// Take a manual snapshot of target tables.
    Snapshot(SnapshotArgs),

    /// Restore target tables from a snapshot.
    Rollback(RollbackArgs),

    /// List batches, or show one batch in detail.
    Status(StatusArgs),

    /// List duplicate candidates.
    Duplicates(DuplicatesArgs),

    /// Resolve a duplicate candidate.
    Resolve(ResolveArgs),

    /// Show cell lineage for a batch.
    Lineage(LineageArgs),

    /// Print the target schema.
    Schema,
}

#[derive(Args)]
pub struct SourceArgs {
    /// CSV export with a header row.
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// Name of the legacy system that produced the export.
    #[arg(long = "source-system", value_name = "NAME")]
    pub source_system: Option<String>,
}

#[derive(Args)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Identity confirming the mappings.
    #[arg(long = "approver", value_name = "WHO")]
    pub approver: String,

    /// Identity recorded for overrides and skips [default: approver].
    #[arg(long = "reviewer", value_name = "WHO")]
    pub reviewer: Option<String>,

    /// Point a source column at a target, e.g. `PatID=patients.mrn`.
    #[arg(long = "set", value_name = "SRC=TABLE.COLUMN", value_parser = parse_override)]
    pub overrides: Vec<MappingOverride>,

    /// Exclude a source column from the migration.
    #[arg(long = "skip", value_name = "SRC")]
    pub skips: Vec<String>,

    /// Where to write the confirmed mappings.
    #[arg(long = "out", value_name = "PATH")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Confirmed mappings written by `edm review`.
    #[arg(long = "mappings", value_name = "PATH")]
    pub mappings: PathBuf,

    /// Transform and validate without taking snapshots or writing.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(long = "no-snapshot")]
    pub no_snapshot: bool,

    #[arg(long = "no-dedup")]
    pub no_dedup: bool,

    #[arg(long = "no-lineage")]
    pub no_lineage: bool,

    #[arg(long = "no-quality")]
    pub no_quality: bool,

    /// Fail transient write errors instead of queueing them.
    #[arg(long = "no-retry")]
    pub no_retry: bool,

    /// Worker threads (overrides `executor.worker_count`).
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Rows per chunk (overrides `executor.chunk_size`).
    #[arg(long = "chunk-size", value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Identifier under which the confirmed mappings join the precedent history.
    #[arg(long = "migration-id", value_name = "ID")]
    pub migration_id: Option<String>,
}

#[derive(Args)]
pub struct RetryArgs {
    /// Process as if the clock read this RFC 3339 instant.
    #[arg(long = "at", value_name = "TIME")]
    pub at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// Tables to capture [default: every table in the target schema].
    #[arg(long = "table", value_name = "TABLE")]
    pub tables: Vec<String>,

    #[arg(long = "name", value_name = "NAME")]
    pub name: String,
}

#[derive(Args)]
pub struct RollbackArgs {
    #[arg(value_name = "SNAPSHOT_ID")]
    pub snapshot_id: String,

    #[arg(long = "reason", value_name = "TEXT")]
    pub reason: String,

    #[arg(long = "approver", value_name = "WHO")]
    pub approver: String,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(value_name = "BATCH_ID")]
    pub batch_id: Option<String>,
}

#[derive(Args)]
pub struct DuplicatesArgs {
    #[arg(long = "batch", value_name = "BATCH_ID")]
    pub batch_id: Option<String>,

    /// Include resolved candidates.
    #[arg(long = "all")]
    pub all: bool,
}

#[derive(Args)]
pub struct ResolveArgs {
    #[arg(value_name = "CANDIDATE_ID")]
    pub candidate_id: String,

    #[arg(value_enum, value_name = "RESOLUTION")]
    pub resolution: ResolutionArg,

    #[arg(long = "by", value_name = "WHO")]
    pub resolved_by: String,
}

#[derive(Args)]
pub struct LineageArgs {
    #[arg(value_name = "BATCH_ID")]
    pub batch_id: String,

    /// Limit to one source row.
    #[arg(long = "row", value_name = "N")]
    pub row: Option<u64>,

    /// Print rule ids per target column instead of individual records.
    #[arg(long = "summary")]
    pub summary: bool,
}

/// `SRC=TABLE.COLUMN` override given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOverride {
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

pub fn parse_override(raw: &str) -> Result<MappingOverride, String> {
    let (source, target) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SRC=TABLE.COLUMN, got '{raw}'"))?;
    let (table, column) = target
        .rsplit_once('.')
        .ok_or_else(|| format!("expected TABLE.COLUMN after '=', got '{target}'"))?;
    let (source, table, column) = (source.trim(), table.trim(), column.trim());
    if source.is_empty() || table.is_empty() || column.is_empty() {
        return Err(format!("blank part in override '{raw}'"));
    }
    Ok(MappingOverride {
        source_column: source.to_string(),
        target_table: table.to_string(),
        target_column: column.to_string(),
    })
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ResolutionArg {
    MergeA,
    MergeB,
    KeepBoth,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::MergeA => Resolution::MergeA,
            ResolutionArg::MergeB => Resolution::MergeB,
            ResolutionArg::KeepBoth => Resolution::KeepBoth,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
