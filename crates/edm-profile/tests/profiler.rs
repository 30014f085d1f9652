//! Integration tests for source profiling.

use edm_model::{Dataset, PatternKind, ProfilerSettings};
use edm_profile::{MATCHER_VERSION, Profiler};
use edm_transform::identifiers::npi_check_digit;
use proptest::prelude::*;

/// Builds `count` checksum-valid NPIs.
fn valid_npis(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let first_nine = format!("1{:08}", 20_000_000 + i * 7);
            let check = npi_check_digit(&first_nine).expect("nine digits");
            format!("{first_nine}{check}")
        })
        .collect()
}

#[test]
fn npi_column_is_detected() {
    let npis = valid_npis(100);
    let rows: Vec<Vec<(&str, &str)>> = npis
        .iter()
        .map(|npi| vec![("npi_number", npi.as_str()), ("full_name", "Dr. Example")])
        .collect();
    let dataset = Dataset::from_text_rows("staff.csv", "csv", rows);

    let dna = Profiler::default().profile(&dataset);

    assert_eq!(dna.row_count, 100);
    assert_eq!(dna.column_count, 2);
    assert_eq!(dna.matcher_version, MATCHER_VERSION);
    let npi = dna.column("npi_number").expect("npi column");
    assert_eq!(npi.primary_pattern, PatternKind::Npi);
    assert_eq!(npi.pattern_confidence, 1.0);
    assert_eq!(npi.unique_percentage, 1.0);
    assert_eq!(dna.column("full_name").map(|c| c.primary_pattern), Some(PatternKind::Text));
}

#[test]
fn sampling_is_limited_to_first_values() {
    // First 50 values are dates, the rest free text: only the sample decides.
    let mut values: Vec<String> = (1..=50).map(|d| format!("2024-01-{:02}", d % 28 + 1)).collect();
    values.extend((0..50).map(|i| format!("note {i}")));
    let rows: Vec<Vec<(&str, &str)>> = values.iter().map(|v| vec![("visit", v.as_str())]).collect();
    let dataset = Dataset::from_text_rows("visits.csv", "csv", rows);

    let dna = Profiler::new(ProfilerSettings::default()).profile(&dataset);
    assert_eq!(dna.columns[0].primary_pattern, PatternKind::Date);
}

fn dataset_strategy() -> impl Strategy<Value = Dataset> {
    prop::collection::vec(
        (
            prop::option::of("[a-z]{0,6}"),
            prop::option::of(0i64..1000),
            prop::option::of(prop_oneof![Just("yes"), Just("no"), Just(" ")]),
        ),
        0..40,
    )
    .prop_map(|rows| {
        let mut dataset = Dataset::new(
            "generated.csv",
            "csv",
            vec!["word".into(), "count".into(), "flag".into()],
        );
        for (word, count, flag) in rows {
            let count = count.map(|c| c.to_string());
            let values = [
                ("word", word.as_deref()),
                ("count", count.as_deref()),
                ("flag", flag),
            ];
            let cells = values
                .iter()
                .filter_map(|(column, raw)| {
                    raw.map(|raw| (column.to_string(), edm_model::CellValue::from_raw(raw)))
                })
                .collect();
            dataset.push_row(cells);
        }
        dataset
    })
}

proptest! {
    #[test]
    fn percentages_stay_in_unit_interval(dataset in dataset_strategy()) {
        let dna = Profiler::default().profile(&dataset);
        for column in &dna.columns {
            prop_assert!((0.0..=1.0).contains(&column.null_percentage));
            prop_assert!((0.0..=1.0).contains(&column.unique_percentage));
            prop_assert!(column.avg_length >= 0.0);
        }
    }

    #[test]
    fn profiling_is_idempotent(dataset in dataset_strategy()) {
        let profiler = Profiler::default();
        prop_assert_eq!(profiler.profile(&dataset), profiler.profile(&dataset));
    }
}
