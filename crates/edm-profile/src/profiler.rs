//! Source profiler ("DNA generator").
//!
//! Profiling is a pure function of the dataset, the settings and
//! [`MATCHER_VERSION`]: the same input always yields the same [`SourceDna`].

use std::collections::BTreeSet;
use std::time::Instant;

use edm_model::{ColumnDna, Dataset, ProfilerSettings, SourceDna};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::matchers::{MATCHER_VERSION, classify};

#[derive(Debug, Clone, Default)]
pub struct Profiler {
    settings: ProfilerSettings,
}

impl Profiler {
    pub fn new(settings: ProfilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProfilerSettings {
        &self.settings
    }

    /// Profiles every column of `dataset`, in upload column order.
    pub fn profile(&self, dataset: &Dataset) -> SourceDna {
        let start = Instant::now();
        let columns: Vec<ColumnDna> = dataset
            .columns
            .par_iter()
            .map(|column| self.profile_column(dataset, column))
            .collect();

        info!(
            source_file = %dataset.source_file,
            columns = columns.len(),
            rows = dataset.row_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "profiled source"
        );

        SourceDna {
            source_system: dataset.source_system.clone(),
            source_type: dataset.source_type.clone(),
            source_file: dataset.source_file.clone(),
            matcher_version: MATCHER_VERSION.to_string(),
            column_count: columns.len(),
            row_count: dataset.row_count(),
            columns,
        }
    }

    fn profile_column(&self, dataset: &Dataset, column: &str) -> ColumnDna {
        let total = dataset.row_count();
        let mut null_count = 0usize;
        let mut distinct: BTreeSet<String> = BTreeSet::new();
        let mut length_sum = 0usize;
        let mut samples: Vec<String> = Vec::new();

        for value in dataset.column_values(column) {
            let Some(text) = value.as_text() else {
                null_count += 1;
                continue;
            };
            length_sum += text.chars().count();
            if samples.len() < self.settings.sample_size {
                samples.push(text.to_string());
            }
            if !distinct.contains(text.as_ref()) {
                distinct.insert(text.into_owned());
            }
        }

        let non_null = total - null_count;
        let (null_percentage, unique_percentage) = if total == 0 {
            (1.0, 0.0)
        } else {
            (
                null_count as f64 / total as f64,
                distinct.len() as f64 / total as f64,
            )
        };
        let avg_length = if non_null == 0 {
            0.0
        } else {
            length_sum as f64 / non_null as f64
        };

        let (primary_pattern, pattern_confidence) = classify(&samples, self.settings.pattern_floor);
        debug!(
            column,
            pattern = %primary_pattern,
            confidence = pattern_confidence,
            sampled = samples.len(),
            "classified column"
        );

        let mut kept: Vec<String> = Vec::new();
        for sample in &samples {
            if kept.len() >= self.settings.kept_samples {
                break;
            }
            if !kept.contains(sample) {
                kept.push(sample.clone());
            }
        }

        ColumnDna {
            original_name: column.to_string(),
            primary_pattern,
            pattern_confidence,
            sample_values: kept,
            null_percentage,
            unique_percentage,
            avg_length,
            data_type_inferred: primary_pattern.data_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use edm_model::{DataType, PatternKind};

    use super::*;

    #[test]
    fn statistics_count_blank_as_null() {
        let dataset = Dataset::from_text_rows(
            "people.csv",
            "csv",
            vec![
                vec![("email", "a@x.org")],
                vec![("email", "A@x.org ")],
                vec![("email", "")],
                vec![("email", "a@x.org")],
            ],
        );
        let dna = Profiler::default().profile(&dataset.with_source_system("legacy-ehr"));
        let column = dna.column("email").expect("email column");
        assert_eq!(column.primary_pattern, PatternKind::Email);
        assert_eq!(column.data_type_inferred, DataType::String);
        assert!((column.null_percentage - 0.25).abs() < 1e-9);
        // "a@x.org" and "A@x.org" are distinct values.
        assert!((column.unique_percentage - 0.5).abs() < 1e-9);
        assert!((column.avg_length - 7.0).abs() < 1e-9);
        assert_eq!(column.sample_values, vec!["a@x.org", "A@x.org"]);
    }

    #[test]
    fn empty_dataset_profiles_as_empty() {
        let mut dataset = Dataset::new("empty.csv", "csv", vec!["a".to_string()]);
        dataset.source_system = Some("legacy".into());
        let dna = Profiler::default().profile(&dataset);
        assert_eq!(dna.row_count, 0);
        assert_eq!(dna.columns[0].primary_pattern, PatternKind::Empty);
        assert_eq!(dna.columns[0].null_percentage, 1.0);
    }
}
