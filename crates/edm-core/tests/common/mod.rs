#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use edm_core::{InMemoryStore, MigrationExecutor, TargetStore};
use edm_model::{
    CellValue, ConfirmedMappings, Dataset, EngineConfig, IdentityFields, MappingSuggestion,
    PatternKind, ReviewSession, SemanticType, TargetColumn, TargetSchema, TargetTable,
};

pub const SOURCE_FILE: &str = "legacy_patients.csv";

pub fn clinic_schema() -> TargetSchema {
    TargetSchema::new("clinic", "2024.1")
        .with_table(
            "patients",
            TargetTable::default()
                .with_column("mrn", TargetColumn::new(SemanticType::Identifier).required().unique())
                .with_column("first_name", TargetColumn::new(SemanticType::Name).required())
                .with_column("last_name", TargetColumn::new(SemanticType::Name).required())
                .with_column("birth_date", TargetColumn::new(SemanticType::Date).required())
                .with_column("phone", TargetColumn::new(SemanticType::Phone))
                .with_column("email", TargetColumn::new(SemanticType::Email))
                .with_identity(IdentityFields {
                    name: vec!["first_name".to_string(), "last_name".to_string()],
                    dob: Some("birth_date".to_string()),
                    phone: Some("phone".to_string()),
                    email: Some("email".to_string()),
                }),
        )
        .with_table(
            "hc_staff",
            TargetTable::default()
                .with_column("npi", TargetColumn::new(SemanticType::Npi).required().unique())
                .with_column("full_name", TargetColumn::new(SemanticType::Name).required()),
        )
}

/// Source columns and the patient targets they feed.
pub const PATIENT_COLUMNS: [(&str, &str); 5] = [
    ("PatID", "mrn"),
    ("First", "first_name"),
    ("Last", "last_name"),
    ("DOB", "birth_date"),
    ("Email", "email"),
];

/// `rows` distinct patients; listed row numbers carry a malformed email.
pub fn patient_dataset(rows: u64, bad_email_rows: &[u64]) -> Dataset {
    let mut dataset = Dataset::new(SOURCE_FILE, "csv", Vec::new()).with_source_system("legacy-ehr");
    for number in 1..=rows {
        let i = number - 1;
        let email = if bad_email_rows.contains(&number) {
            "not-an-email".to_string()
        } else {
            format!("patient{number}@clinic.org")
        };
        dataset.push_row(BTreeMap::from([
            ("PatID".to_string(), CellValue::text(format!("MRN{number:04}"))),
            ("First".to_string(), CellValue::text(format!("Given{number}"))),
            ("Last".to_string(), CellValue::text("Doe")),
            (
                "DOB".to_string(),
                CellValue::text(format!(
                    "19{:02}-{:02}-{:02}",
                    50 + i % 40,
                    1 + i % 12,
                    1 + i % 28
                )),
            ),
            ("Email".to_string(), CellValue::text(email)),
        ]));
    }
    dataset
}

pub fn suggestion(source: &str, table: &str, column: &str) -> MappingSuggestion {
    MappingSuggestion {
        source_column: source.to_string(),
        target_table: table.to_string(),
        target_column: column.to_string(),
        confidence: 0.9,
        reasons: vec!["exact name match".to_string()],
        alternative_mappings: Vec::new(),
        source_pattern: PatternKind::Text,
    }
}

/// Runs a review session to confirmation over `(source, table, column)` triples.
pub fn confirm(
    schema: &TargetSchema,
    source_file: &str,
    mappings: &[(&str, &str, &str)],
) -> ConfirmedMappings {
    let mut session = ReviewSession::new(schema, source_file);
    session
        .attach_suggestions(
            mappings
                .iter()
                .map(|(source, table, column)| suggestion(source, table, column))
                .collect(),
        )
        .expect("attach suggestions");
    session.begin_review().expect("begin review");
    session.confirm("data.steward@clinic.org").expect("confirm")
}

pub fn confirm_patients(schema: &TargetSchema) -> ConfirmedMappings {
    let triples: Vec<(&str, &str, &str)> = PATIENT_COLUMNS
        .iter()
        .map(|(source, target)| (*source, "patients", *target))
        .collect();
    confirm(schema, SOURCE_FILE, &triples)
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.executor.worker_count = 2;
    config.executor.chunk_size = 16;
    config
}

pub fn executor(store: Arc<InMemoryStore>) -> MigrationExecutor {
    executor_with(store, &test_config())
}

pub fn executor_with(store: Arc<InMemoryStore>, config: &EngineConfig) -> MigrationExecutor {
    let store: Arc<dyn TargetStore> = store;
    MigrationExecutor::new(Arc::new(clinic_schema()), store, config).expect("executor")
}
