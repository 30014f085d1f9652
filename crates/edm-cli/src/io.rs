//! CSV decoding into engine datasets.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use edm_model::{CellValue, Dataset};
use tracing::debug;

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_string()
}

/// Reads a headed CSV file. Blank lines are skipped, short rows are padded
/// with nulls and blank cells become null.
pub fn read_csv_dataset(path: &Path, source_system: Option<&str>) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("read csv: {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("read header: {}", path.display()))?
        .iter()
        .map(normalize_header)
        .collect();
    if headers.iter().all(String::is_empty) {
        bail!("csv has no header row: {}", path.display());
    }
    if let Some(position) = headers.iter().position(String::is_empty) {
        bail!(
            "csv header column {} is blank: {}",
            position + 1,
            path.display()
        );
    }

    let source_file = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
    let mut dataset = Dataset::new(source_file, "csv", headers.clone());
    if let Some(system) = source_system {
        dataset = dataset.with_source_system(system);
    }

    for record in reader.records() {
        let record = record.with_context(|| format!("read record: {}", path.display()))?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let cells: BTreeMap<String, CellValue> = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let raw = record.get(idx).unwrap_or("");
                (header.clone(), CellValue::from_raw(raw.trim()))
            })
            .collect();
        dataset.push_row(cells);
    }
    debug!(
        file = %dataset.source_file,
        columns = dataset.columns.len(),
        rows = dataset.row_count(),
        "csv decoded"
    );
    Ok(dataset)
}
