use std::collections::BTreeMap;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use edm_cli::logging::redact_value;
use edm_core::RetryReport;
use edm_map::{ConfidenceLevel, ConfidenceThresholds, MappingReport};
use edm_model::{
    BatchStatus, ConfirmedMappings, DedupCandidate, LineageRecord, MatchMethod, MigrationBatch,
    MigrationSnapshot, QualityScore, RetryQueueItem, RetryStatus, RollbackEvent, RowFailure,
    SnapshotType, SourceDna, TargetSchema,
};

pub fn print_profile(dna: &SourceDna) {
    println!("Source: {} ({})", dna.source_file, dna.source_type);
    if let Some(system) = &dna.source_system {
        println!("System: {system}");
    }
    println!(
        "Rows: {}  Columns: {}  Matchers: {}",
        dna.row_count, dna.column_count, dna.matcher_version
    );
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Column"),
        header_cell("Pattern"),
        header_cell("Confidence"),
        header_cell("Type"),
        header_cell("Null %"),
        header_cell("Unique %"),
        header_cell("Avg len"),
        header_cell("Samples"),
    ]);
    apply_table_style(&mut table);
    for idx in 2..=6 {
        align_column(&mut table, idx, CellAlignment::Right);
    }
    for column in &dna.columns {
        let samples: Vec<&str> = column
            .sample_values
            .iter()
            .take(3)
            .map(|value| redact_value(value))
            .collect();
        table.add_row(vec![
            Cell::new(&column.original_name).add_attribute(Attribute::Bold),
            Cell::new(column.primary_pattern.as_str()).fg(Color::Blue),
            Cell::new(format!("{:.2}", column.pattern_confidence)),
            Cell::new(format!("{:?}", column.data_type_inferred)),
            percent_cell(column.null_percentage),
            percent_cell(column.unique_percentage),
            Cell::new(format!("{:.1}", column.avg_length)),
            dim_cell(samples.join(", ")),
        ]);
    }
    println!("{table}");
}

pub fn print_suggestions(report: &MappingReport) {
    println!("Schema: {}", report.schema_version);
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Source"),
        header_cell("Target"),
        header_cell("Confidence"),
        header_cell("Level"),
        header_cell("Alternatives"),
        header_cell("Reasons"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    for suggestion in &report.suggestions {
        let target = if suggestion.is_unmapped() {
            Cell::new("UNMAPPED")
                .fg(Color::Red)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(suggestion.target_key())
        };
        let alternatives: Vec<String> = suggestion
            .alternative_mappings
            .iter()
            .map(|alt| format!("{}.{} ({:.2})", alt.target_table, alt.target_column, alt.confidence))
            .collect();
        let level = if suggestion.is_unmapped() {
            None
        } else {
            ConfidenceThresholds::default().categorize(suggestion.confidence)
        };
        table.add_row(vec![
            Cell::new(&suggestion.source_column).add_attribute(Attribute::Bold),
            target,
            Cell::new(format!("{:.2}", suggestion.confidence)),
            level_cell(level),
            list_cell(&alternatives),
            Cell::new(suggestion.reasons.join("; ")),
        ]);
    }
    println!("{table}");

    let counts = report.count_by_level();
    let summary: Vec<String> = [ConfidenceLevel::High, ConfidenceLevel::Medium, ConfidenceLevel::Low]
        .into_iter()
        .map(|level| format!("{level:?}: {}", counts.get(&level).copied().unwrap_or(0)))
        .collect();
    println!("{}", summary.join("  "));
    let unmapped = report.unmapped_columns();
    if !unmapped.is_empty() {
        println!("Unmapped: {}", unmapped.join(", "));
    }
    println!(
        "Estimated accuracy: {:.1}%  Auto-execute permitted: {}",
        report.estimated_accuracy * 100.0,
        yes_no(report.auto_execute_permitted)
    );
    for similar in &report.similar_past_migrations {
        println!(
            "Similar past migration: {} ({}) similarity {:.2}, {} mapped columns",
            similar.migration_id,
            similar.source_system.as_deref().unwrap_or("unknown system"),
            similar.similarity,
            similar.mapped_columns
        );
    }
}

pub fn print_confirmed(confirmed: &ConfirmedMappings) {
    let confirmation = confirmed.confirmation();
    println!(
        "Confirmed {} for {} by {} at {}",
        confirmed.schema_version(),
        confirmed.source_file(),
        confirmation.confirmed_by,
        confirmation.confirmed_at.to_rfc3339()
    );
    let mut table = Table::new();
    table.set_header(vec![header_cell("Source"), header_cell("Target"), header_cell("Status")]);
    apply_table_style(&mut table);
    for mapping in confirmed.mappings() {
        let status = if mapping.is_active() {
            Cell::new("active").fg(Color::Green)
        } else {
            dim_cell("skipped")
        };
        table.add_row(vec![
            Cell::new(mapping.source_column()),
            Cell::new(format!("{}.{}", mapping.target_table(), mapping.target_column())),
            status,
        ]);
    }
    println!("{table}");
}

pub fn print_batch(
    batch: &MigrationBatch,
    failures: &[RowFailure],
    quality: Option<&QualityScore>,
    retries: &[RetryQueueItem],
) {
    println!("Batch: {}", batch.batch_id);
    println!(
        "Source: {} ({})  Schema: {}",
        batch.source_file, batch.source_system, batch.schema_version
    );
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Status"),
        header_cell("Records"),
        header_cell("Succeeded"),
        header_cell("Failed"),
        header_cell("Pending"),
        header_cell("Snapshot"),
    ]);
    apply_table_style(&mut table);
    for idx in 1..=4 {
        align_column(&mut table, idx, CellAlignment::Right);
    }
    table.add_row(vec![
        status_cell(batch),
        Cell::new(batch.record_count),
        Cell::new(batch.success_count),
        count_cell(batch.error_count, Color::Red),
        count_cell(batch.pending_count, Color::Yellow),
        batch
            .snapshot_id
            .as_deref()
            .map_or_else(|| dim_cell("-"), Cell::new),
    ]);
    println!("{table}");
    if let Some(reason) = &batch.failure_reason {
        eprintln!("Failure: {reason}");
    }
    if !failures.is_empty() {
        print_failures(failures);
    }
    if !retries.is_empty() {
        print_retry_items(retries);
    }
    if let Some(score) = quality {
        print_quality(score);
    }
}

fn print_failures(failures: &[RowFailure]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Row"),
        header_cell("Column"),
        header_cell("Rule"),
        header_cell("Kind"),
        header_cell("Message"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    for failure in failures {
        table.add_row(vec![
            Cell::new(failure.source_row),
            optional_cell(failure.source_column.as_deref()),
            Cell::new(&failure.rule).fg(Color::Red),
            Cell::new(failure.kind.code()),
            Cell::new(&failure.message),
        ]);
    }
    println!();
    println!("Failures:");
    println!("{table}");
}

fn print_retry_items(items: &[RetryQueueItem]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Retry"),
        header_cell("Table"),
        header_cell("Rows"),
        header_cell("Attempt"),
        header_cell("Status"),
        header_cell("Next attempt"),
        header_cell("Error"),
    ]);
    apply_table_style(&mut table);
    for item in items {
        let rows: Vec<String> = item.source_row_numbers.iter().map(u64::to_string).collect();
        table.add_row(vec![
            Cell::new(&item.retry_id),
            Cell::new(&item.target_table),
            Cell::new(rows.join(",")),
            Cell::new(format!("{}/{}", item.attempt_number, item.max_attempts)),
            retry_status_cell(item.status),
            Cell::new(item.next_retry_at.to_rfc3339()),
            Cell::new(format!("{}: {}", item.error_code, item.error_message)),
        ]);
    }
    println!();
    println!("Retry queue:");
    println!("{table}");
}

pub fn print_quality(score: &QualityScore) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Overall"),
        header_cell("Grade"),
        header_cell("Completeness"),
        header_cell("Accuracy"),
        header_cell("Consistency"),
        header_cell("Uniqueness"),
        header_cell("Ready"),
    ]);
    apply_table_style(&mut table);
    let grade_color = if score.ready_for_production {
        Color::Green
    } else {
        Color::Yellow
    };
    table.add_row(vec![
        Cell::new(format!("{:.1}", score.overall_score)).add_attribute(Attribute::Bold),
        Cell::new(score.grade.as_str())
            .fg(grade_color)
            .add_attribute(Attribute::Bold),
        Cell::new(format!("{:.1}", score.completeness_score)),
        Cell::new(format!("{:.1}", score.accuracy_score)),
        Cell::new(format!("{:.1}", score.consistency_score)),
        Cell::new(format!("{:.1}", score.uniqueness_score)),
        Cell::new(yes_no(score.ready_for_production)).fg(grade_color),
    ]);
    println!();
    println!("Quality:");
    println!("{table}");
    for recommendation in &score.recommendations {
        println!("- {recommendation}");
    }
}

pub fn print_batches(batches: &[MigrationBatch]) {
    if batches.is_empty() {
        println!("No batches.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Batch"),
        header_cell("Source"),
        header_cell("Status"),
        header_cell("Records"),
        header_cell("Succeeded"),
        header_cell("Failed"),
        header_cell("Pending"),
        header_cell("Started"),
    ]);
    apply_table_style(&mut table);
    for idx in 3..=6 {
        align_column(&mut table, idx, CellAlignment::Right);
    }
    for batch in batches {
        table.add_row(vec![
            Cell::new(&batch.batch_id),
            Cell::new(&batch.source_file),
            status_cell(batch),
            Cell::new(batch.record_count),
            Cell::new(batch.success_count),
            count_cell(batch.error_count, Color::Red),
            count_cell(batch.pending_count, Color::Yellow),
            Cell::new(batch.started_at.to_rfc3339()),
        ]);
    }
    println!("{table}");
}

pub fn print_retry_report(report: &RetryReport, remaining: &[RetryQueueItem]) {
    if report.outcomes.is_empty() {
        println!("No retry items were due.");
    }
    for outcome in &report.outcomes {
        println!(
            "{} (batch {}): attempt {} -> {}",
            outcome.retry_id,
            outcome.batch_id,
            outcome.attempt_number,
            retry_status_label(outcome.status)
        );
    }
    for (batch_id, status) in &report.finalized {
        println!("Batch {batch_id} finalized as {status}");
    }
    let pending: Vec<RetryQueueItem> = remaining
        .iter()
        .filter(|item| !item.status.is_terminal())
        .cloned()
        .collect();
    if !pending.is_empty() {
        print_retry_items(&pending);
    }
}

pub fn print_snapshot(snapshot: &MigrationSnapshot) {
    println!(
        "Snapshot {} ({}) \"{}\": {} rows across {}",
        snapshot.snapshot_id,
        snapshot_type_label(snapshot.snapshot_type),
        snapshot.snapshot_name,
        snapshot.total_rows,
        snapshot.tables_included.join(", ")
    );
    println!("Checksum: {}", snapshot.checksum);
    if let Some(expires) = snapshot.expires_at {
        println!("Expires: {}", expires.to_rfc3339());
    }
}

pub fn print_snapshots(snapshots: &[MigrationSnapshot], rollbacks: usize) {
    if snapshots.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Snapshot"),
        header_cell("Name"),
        header_cell("Type"),
        header_cell("Tables"),
        header_cell("Rows"),
        header_cell("Created"),
        header_cell("Expires"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 4, CellAlignment::Right);
    for snapshot in snapshots {
        table.add_row(vec![
            Cell::new(&snapshot.snapshot_id),
            Cell::new(&snapshot.snapshot_name),
            Cell::new(snapshot_type_label(snapshot.snapshot_type)),
            Cell::new(snapshot.tables_included.join(", ")),
            Cell::new(snapshot.total_rows),
            Cell::new(snapshot.created_at.to_rfc3339()),
            snapshot
                .expires_at
                .map_or_else(|| dim_cell("never"), |at| Cell::new(at.to_rfc3339())),
        ]);
    }
    println!();
    println!("Snapshots ({rollbacks} rollback(s) performed):");
    println!("{table}");
}

pub fn print_rollback(event: &RollbackEvent) {
    println!(
        "Rolled back {} from snapshot {}: {} rows restored",
        event.tables.join(", "),
        event.snapshot_id,
        event.rows_restored
    );
    println!("Approved by {}: {}", event.approver, event.reason);
}

pub fn print_candidates(candidates: &[DedupCandidate]) {
    if candidates.is_empty() {
        println!("No duplicate candidates.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Candidate"),
        header_cell("Table"),
        header_cell("Record A"),
        header_cell("Record B"),
        header_cell("Similarity"),
        header_cell("Method"),
        header_cell("Resolution"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 4, CellAlignment::Right);
    for candidate in candidates {
        let method = match candidate.match_method {
            MatchMethod::Exact => "exact",
            MatchMethod::WeightedFuzzy => "weighted fuzzy",
        };
        let resolution = if candidate.resolution.is_pending() {
            Cell::new("pending")
                .fg(Color::Yellow)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(format!(
                "{} ({})",
                candidate.resolution,
                candidate.resolved_by.as_deref().unwrap_or("-")
            ))
            .fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(&candidate.candidate_id),
            Cell::new(&candidate.target_table),
            Cell::new(&candidate.record_a_id),
            Cell::new(&candidate.record_b_id),
            Cell::new(format!("{:.3}", candidate.overall_similarity)),
            Cell::new(method),
            resolution,
        ]);
    }
    println!("{table}");
}

pub fn print_lineage(records: &[LineageRecord]) {
    if records.is_empty() {
        println!("No lineage recorded.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Row"),
        header_cell("Source column"),
        header_cell("Target"),
        header_cell("Record"),
        header_cell("Transformations"),
        header_cell("Valid"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    for record in records {
        let steps: Vec<&str> = record
            .transformations
            .iter()
            .map(|step| step.rule_id.as_str())
            .collect();
        let valid = if record.validation_passed {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(record.source_row),
            Cell::new(&record.source_column),
            Cell::new(format!("{}.{}", record.target_table, record.target_column)),
            optional_cell(record.record_id.as_deref()),
            Cell::new(steps.join(" -> ")),
            valid,
        ]);
    }
    println!("{table}");
}

pub fn print_lineage_summary(summary: &BTreeMap<String, Vec<String>>) {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Target"), header_cell("Rules")]);
    apply_table_style(&mut table);
    for (target, rules) in summary {
        table.add_row(vec![Cell::new(target), list_cell(rules)]);
    }
    println!("{table}");
}

pub fn print_schema(schema: &TargetSchema) {
    println!("Schema: {}", schema.version_key());
    if let Some(fingerprint) = &schema.fingerprint {
        println!("SHA-256: {fingerprint}");
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Column"),
        header_cell("Type"),
        header_cell("Required"),
        header_cell("Unique"),
        header_cell("Synonyms"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 3, CellAlignment::Center);
    align_column(&mut table, 4, CellAlignment::Center);
    for (table_name, target) in &schema.tables {
        for (column_name, column) in &target.columns {
            table.add_row(vec![
                Cell::new(table_name).fg(Color::Blue),
                Cell::new(column_name).add_attribute(Attribute::Bold),
                Cell::new(column.semantic_type.as_str()),
                flag_cell(column.required),
                flag_cell(column.unique),
                list_cell(&column.synonyms),
            ]);
        }
    }
    println!("{table}");
}

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn status_cell(batch: &MigrationBatch) -> Cell {
    let color = match batch.status {
        _ if batch.dry_run => Color::Blue,
        BatchStatus::Completed => Color::Green,
        BatchStatus::CompletedWithErrors | BatchStatus::Processing => Color::Yellow,
        BatchStatus::Failed => Color::Red,
        BatchStatus::DryRun => Color::Blue,
    };
    let label = if batch.dry_run && batch.status != BatchStatus::DryRun {
        format!("{} (dry run)", batch.status)
    } else {
        batch.status.to_string()
    };
    Cell::new(label).fg(color).add_attribute(Attribute::Bold)
}

fn snapshot_type_label(kind: SnapshotType) -> &'static str {
    match kind {
        SnapshotType::PreMigration => "pre-migration",
        SnapshotType::Manual => "manual",
    }
}

fn retry_status_label(status: RetryStatus) -> &'static str {
    match status {
        RetryStatus::Pending => "pending",
        RetryStatus::Retrying => "retrying",
        RetryStatus::Exhausted => "exhausted",
        RetryStatus::Succeeded => "succeeded",
    }
}

fn retry_status_cell(status: RetryStatus) -> Cell {
    let color = match status {
        RetryStatus::Succeeded => Color::Green,
        RetryStatus::Exhausted => Color::Red,
        RetryStatus::Pending | RetryStatus::Retrying => Color::Yellow,
    };
    Cell::new(retry_status_label(status)).fg(color)
}

fn level_cell(level: Option<ConfidenceLevel>) -> Cell {
    match level {
        Some(ConfidenceLevel::High) => Cell::new("high").fg(Color::Green),
        Some(ConfidenceLevel::Medium) => Cell::new("medium").fg(Color::Yellow),
        Some(ConfidenceLevel::Low) => Cell::new("low").fg(Color::Red),
        None => dim_cell("-"),
    }
}

fn count_cell(count: u64, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn percent_cell(fraction: f64) -> Cell {
    Cell::new(format!("{:.1}", fraction * 100.0))
}

fn flag_cell(value: bool) -> Cell {
    if value {
        Cell::new("✓").fg(Color::Green)
    } else {
        dim_cell("-")
    }
}

fn optional_cell(value: Option<&str>) -> Cell {
    value.map_or_else(|| dim_cell("-"), Cell::new)
}

fn list_cell(values: &[String]) -> Cell {
    if values.is_empty() {
        dim_cell("-")
    } else {
        Cell::new(values.join(", "))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
