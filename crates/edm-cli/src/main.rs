//! `edm`: enterprise data migration CLI.

use std::io::{self, IsTerminal};

use clap::{ColorChoice, Parser};
use edm_cli::logging::{LogConfig, LogFormat, init_logging};
use tracing::level_filters::LevelFilter;

mod cli;
mod commands;
mod summary;
mod types;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::commands::{
    Workspace, run_duplicates, run_lineage, run_migrate, run_profile, run_resolve, run_retry,
    run_review, run_rollback, run_schema, run_snapshot, run_status, run_suggest,
};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let workspace = match Workspace::load(&cli) {
        Ok(workspace) => workspace,
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    };
    let result = match &cli.command {
        Command::Profile(args) => run_profile(&workspace, args),
        Command::Suggest(args) => run_suggest(&workspace, args),
        Command::Review(args) => run_review(&workspace, args),
        Command::Migrate(args) => run_migrate(&workspace, args),
        Command::Retry(args) => run_retry(&workspace, args),
        Command::Snapshot(args) => run_snapshot(&workspace, args),
        Command::Rollback(args) => run_rollback(&workspace, args),
        Command::Status(args) => run_status(&workspace, args),
        Command::Duplicates(args) => run_duplicates(&workspace, args),
        Command::Resolve(args) => run_resolve(&workspace, args),
        Command::Lineage(args) => run_lineage(&workspace, args),
        Command::Schema => run_schema(&workspace),
    };
    let exit_code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

/// Explicit `--log-level` wins over `-v`/`-q`, which win over `RUST_LOG`.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        use_env_filter: !cli.verbosity.is_present(),
        ..LogConfig::default()
    };
    if let Some(level) = cli.log_level {
        config = config.with_level(match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        });
    }
    config = config
        .with_format(match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        })
        .with_log_file(cli.log_file.clone())
        .with_log_data(cli.log_data);
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
