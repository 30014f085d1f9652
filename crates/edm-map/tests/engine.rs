use edm_map::{ConfidenceLevel, HistoricalMigration, MappingEngine};
use edm_model::{
    ColumnDna, Dataset, MappingSettings, PatternKind, ReviewSession, SemanticType, SourceDna,
    TargetColumn, TargetSchema, TargetTable, UNMAPPED,
};
use edm_profile::Profiler;
use edm_transform::identifiers::npi_check_digit;
use proptest::prelude::*;

fn clinic_schema() -> TargetSchema {
    TargetSchema::new("clinic", "2024.1")
        .with_table(
            "hc_staff",
            TargetTable::default()
                .with_column("npi", TargetColumn::new(SemanticType::Npi).required().unique())
                .with_column("full_name", TargetColumn::new(SemanticType::Name))
                .with_column("email", TargetColumn::new(SemanticType::Email))
                .with_column("phone", TargetColumn::new(SemanticType::Phone)),
        )
        .with_table(
            "patients",
            TargetTable::default()
                .with_column("mrn", TargetColumn::new(SemanticType::Identifier).unique())
                .with_column("first_name", TargetColumn::new(SemanticType::Name))
                .with_column("last_name", TargetColumn::new(SemanticType::Name))
                .with_column("birth_date", TargetColumn::new(SemanticType::Date))
                .with_column("notes", TargetColumn::new(SemanticType::Text)),
        )
}

fn column_dna(name: &str, pattern: PatternKind) -> ColumnDna {
    ColumnDna {
        original_name: name.to_string(),
        primary_pattern: pattern,
        pattern_confidence: 1.0,
        sample_values: Vec::new(),
        null_percentage: 0.0,
        unique_percentage: 1.0,
        avg_length: 8.0,
        data_type_inferred: pattern.data_type(),
    }
}

fn source(columns: Vec<ColumnDna>) -> SourceDna {
    SourceDna {
        source_system: Some("legacy-ehr".into()),
        source_type: "csv".into(),
        source_file: "export.csv".into(),
        matcher_version: edm_profile::MATCHER_VERSION.into(),
        column_count: columns.len(),
        row_count: 10,
        columns,
    }
}

fn staff_dataset() -> Dataset {
    let npis: Vec<String> = (0..100)
        .map(|i| {
            let first_nine = format!("1{:08}", 30_000_000 + i * 13);
            let check = npi_check_digit(&first_nine).expect("nine digits");
            format!("{first_nine}{check}")
        })
        .collect();
    let rows: Vec<Vec<(&str, &str)>> = npis
        .iter()
        .map(|npi| vec![("npi_number", npi.as_str()), ("full_name", "Dana Whitfield")])
        .collect();
    Dataset::from_text_rows("staff.csv", "csv", rows)
}

#[test]
fn npi_column_maps_to_staff_npi() {
    let dna = Profiler::default().profile(&staff_dataset());
    assert_eq!(
        dna.column("npi_number").map(|c| c.primary_pattern),
        Some(PatternKind::Npi)
    );

    let engine = MappingEngine::new(clinic_schema(), MappingSettings::default(), Vec::new());
    let report = engine.suggest(&dna);

    let npi = report
        .suggestions
        .iter()
        .find(|s| s.source_column == "npi_number")
        .expect("npi suggestion");
    assert_eq!(npi.target_table, "hc_staff");
    assert_eq!(npi.target_column, "npi");
    assert!(npi.confidence >= 0.8, "confidence {}", npi.confidence);
    assert!(!npi.reasons.is_empty());
    assert_eq!(report.schema_version, "clinic@2024.1");
    assert!(report.unmapped_columns().is_empty());
    assert!(report.auto_execute_permitted);
    assert_eq!(report.count_by_level().get(&ConfidenceLevel::High), Some(&2));
}

#[test]
fn unrecognized_column_is_unmapped() {
    let dna = source(vec![
        column_dna("qqqq", PatternKind::Boolean),
        column_dna("email", PatternKind::Email),
    ]);
    let engine = MappingEngine::new(clinic_schema(), MappingSettings::default(), Vec::new());
    let report = engine.suggest(&dna);

    let unmapped = report
        .suggestions
        .iter()
        .find(|s| s.source_column == "qqqq")
        .expect("suggestion");
    assert_eq!(unmapped.target_table, UNMAPPED);
    assert!(unmapped.target_column.is_empty());
    assert!(unmapped.confidence < 0.5);
    assert!(
        unmapped
            .alternative_mappings
            .iter()
            .all(|alt| alt.confidence <= unmapped.confidence)
    );
    assert_eq!(report.unmapped_columns(), vec!["qqqq"]);
    assert!(!report.auto_execute_permitted);
    assert_eq!(report.suggestions.last().map(|s| s.source_column.as_str()), Some("qqqq"));
}

#[test]
fn incompatible_targets_are_excluded() {
    let dna = source(vec![column_dna("email_address", PatternKind::Email)]);
    let engine = MappingEngine::new(clinic_schema(), MappingSettings::default(), Vec::new());
    let report = engine.suggest(&dna);
    let suggestion = &report.suggestions[0];
    assert_eq!(suggestion.target_key(), "hc_staff.email");
    // Only hc_staff.email (exact) and patients.notes (text) accept email values.
    assert_eq!(suggestion.alternative_mappings.len(), 1);
    assert_eq!(suggestion.alternative_mappings[0].target_column, "notes");
}

#[test]
fn confirmed_precedent_raises_confidence() {
    let schema = clinic_schema();
    let settings = MappingSettings {
        max_alternatives: 20,
        ..MappingSettings::default()
    };
    let dna = source(vec![column_dna("prov_ident", PatternKind::Integer)]);

    let cold = MappingEngine::new(schema.clone(), settings.clone(), Vec::new());
    let cold_report = cold.suggest(&dna);
    let confidence_for = |report: &edm_map::MappingReport| {
        let s = &report.suggestions[0];
        if s.target_key() == "hc_staff.npi" {
            return s.confidence;
        }
        s.alternative_mappings
            .iter()
            .find(|a| a.target_table == "hc_staff" && a.target_column == "npi")
            .map(|a| a.confidence)
            .expect("hc_staff.npi candidate")
    };
    let before = confidence_for(&cold_report);

    let mut session = ReviewSession::new(&schema, "export.csv");
    session
        .attach_suggestions(cold_report.suggestions.clone())
        .expect("attach");
    session.begin_review().expect("begin");
    session
        .override_mapping(&schema, "prov_ident", "hc_staff", "npi", "analyst@clinic")
        .expect("override");
    let confirmed = session.confirm("lead@clinic").expect("confirm");
    let past = HistoricalMigration::from_confirmed("m-001", &dna, &confirmed);

    let mut superseded = past.clone();
    superseded.migration_id = "m-000".into();
    superseded.schema_version = "clinic@2023.2".into();
    let stale = MappingEngine::new(schema.clone(), settings.clone(), vec![superseded.clone()]);
    let stale_report = stale.suggest(&dna);
    assert!(stale_report.similar_past_migrations.is_empty());
    assert_eq!(confidence_for(&stale_report), before);

    let warm = MappingEngine::new(schema, settings, vec![superseded, past]);
    let warm_report = warm.suggest(&dna);
    let after = confidence_for(&warm_report);

    assert!(after > before, "{after} should exceed {before}");
    assert_eq!(warm_report.similar_past_migrations.len(), 1);
    assert_eq!(warm_report.similar_past_migrations[0].migration_id, "m-001");
    assert!((warm_report.similar_past_migrations[0].similarity - 1.0).abs() < 1e-9);
}

fn pattern_strategy() -> impl Strategy<Value = PatternKind> {
    prop::sample::select(PatternKind::ALL.to_vec())
}

fn source_strategy() -> impl Strategy<Value = SourceDna> {
    prop::collection::vec(
        ("[a-zA-Z_]{1,14}", pattern_strategy(), 0.0f64..=1.0, 0.0f64..=1.0),
        1..8,
    )
    .prop_map(|columns| {
        let mut seen = std::collections::BTreeSet::new();
        let columns = columns
            .into_iter()
            .filter(|(name, ..)| seen.insert(name.clone()))
            .map(|(name, pattern, null, unique)| {
                let mut dna = column_dna(&name, pattern);
                dna.null_percentage = null;
                dna.unique_percentage = unique.min(1.0 - null);
                dna
            })
            .collect();
        source(columns)
    })
}

proptest! {
    #[test]
    fn suggestions_are_bounded_and_ordered(dna in source_strategy()) {
        let engine = MappingEngine::new(clinic_schema(), MappingSettings::default(), Vec::new());
        let report = engine.suggest(&dna);

        prop_assert_eq!(report.suggestions.len(), dna.columns.len());
        prop_assert!((0.0..=1.0).contains(&report.estimated_accuracy));
        for pair in report.suggestions.windows(2) {
            prop_assert!(pair[0].confidence >= pair[1].confidence);
        }
        for suggestion in &report.suggestions {
            prop_assert!((0.0..=1.0).contains(&suggestion.confidence));
            prop_assert!(suggestion.alternative_mappings.len() <= 3);
            for alternative in &suggestion.alternative_mappings {
                prop_assert!((0.0..=1.0).contains(&alternative.confidence));
                prop_assert!(alternative.confidence <= suggestion.confidence);
            }
        }
    }
}
