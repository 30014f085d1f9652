mod common;

use std::sync::Arc;

use common::{PATIENT_COLUMNS, SOURCE_FILE, patient_dataset, test_config};
use edm_config::{load_target_schema, schemas_root};
use edm_core::{InMemoryStore, MigrationEngine};
use edm_model::{
    BatchStatus, Dataset, ErrorKind, ExecutionOptions, Resolution, ReviewState, SnapshotType,
    TargetSchema,
};

fn bundled_clinic_schema() -> TargetSchema {
    load_target_schema(&schemas_root().join("clinic.toml")).expect("bundled clinic schema")
}

fn engine(store: Arc<InMemoryStore>) -> MigrationEngine {
    MigrationEngine::new(bundled_clinic_schema(), test_config(), store).expect("engine")
}

#[test]
fn reviewed_upload_runs_end_to_end() {
    let store = Arc::new(InMemoryStore::new());
    let mut engine = engine(store.clone());
    let dataset = patient_dataset(12, &[]);

    let (dna, report, mut session) = engine.start_review(&dataset).expect("review");
    assert_eq!(dna.row_count, 12);
    assert_eq!(report.suggestions.len(), PATIENT_COLUMNS.len());
    assert_eq!(session.state(), ReviewState::UnderReview);

    for (source, target) in PATIENT_COLUMNS {
        session
            .override_mapping(engine.schema(), source, "patients", target, "analyst@clinic.org")
            .expect("override");
    }
    let confirmed = session.confirm("lead@clinic.org").expect("confirm");
    session.mark_executing().expect("executing");

    let batch = engine
        .execute(dataset, &confirmed, ExecutionOptions::default())
        .expect("execute");
    session.mark_completed().expect("completed");

    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.schema_version, "clinic@2024.1");
    assert_eq!(batch.source_system, "legacy-ehr");
    assert_eq!(store.row_count("patients"), 12);

    let quality = engine.quality(&batch.batch_id).expect("quality");
    assert!(quality.ready_for_production);
    assert_eq!(quality.grade.as_str(), "A+");
    assert!(quality.recommendations.is_empty());
    assert_eq!(engine.lineage(Some(&batch.batch_id)).len(), 12 * PATIENT_COLUMNS.len());

    let migration = engine.record_history("mig-001", &dna, &confirmed);
    assert_eq!(migration.mappings.len(), PATIENT_COLUMNS.len());
    let again = engine.suggest(&dna);
    assert_eq!(again.similar_past_migrations.len(), 1);
}

#[test]
fn engine_rollback_and_manual_snapshot() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store.clone());
    let (_, _, mut session) = engine.start_review(&patient_dataset(4, &[])).expect("review");
    for (source, target) in PATIENT_COLUMNS {
        session
            .override_mapping(engine.schema(), source, "patients", target, "analyst@clinic.org")
            .expect("override");
    }
    let confirmed = session.confirm("lead@clinic.org").expect("confirm");
    let batch = engine
        .execute(patient_dataset(4, &[]), &confirmed, ExecutionOptions::default())
        .expect("execute");

    let manual = engine
        .create_snapshot(&["patients".to_string()], "after first load")
        .expect("manual snapshot");
    assert_eq!(manual.snapshot_type, SnapshotType::Manual);
    assert_eq!(manual.total_rows, 4);
    assert_eq!(engine.snapshots().len(), 2);

    let snapshot_id = batch.snapshot_id.expect("snapshot id");
    engine
        .rollback(&snapshot_id, "wrong source file", "ops.lead@clinic.org")
        .expect("rollback");
    assert_eq!(store.row_count("patients"), 0);
    assert_eq!(engine.rollback_events().len(), 1);

    engine
        .rollback(&manual.snapshot_id.to_string(), "undo the undo", "ops.lead@clinic.org")
        .expect("restore manual snapshot");
    assert_eq!(store.row_count("patients"), 4);
}

#[test]
fn duplicate_resolution_goes_through_the_engine() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store.clone());
    let dataset = Dataset::from_text_rows(
        SOURCE_FILE,
        "csv",
        vec![
            vec![
                ("PatID", "A-1"),
                ("First", "Maria"),
                ("Last", "Lopez"),
                ("DOB", "1975-09-30"),
                ("Email", "maria.lopez@mail.com"),
            ],
            vec![
                ("PatID", "A-2"),
                ("First", "Maria"),
                ("Last", "Lopez"),
                ("DOB", "1975-09-30"),
                ("Email", "maria.lopez@work.org"),
            ],
        ],
    );
    let (_, _, mut session) = engine.start_review(&dataset).expect("review");
    for (source, target) in PATIENT_COLUMNS {
        session
            .override_mapping(engine.schema(), source, "patients", target, "analyst@clinic.org")
            .expect("override");
    }
    let confirmed = session.confirm("lead@clinic.org").expect("confirm");
    let batch = engine
        .execute(dataset, &confirmed, ExecutionOptions::default())
        .expect("execute");
    assert_eq!(batch.status, BatchStatus::CompletedWithErrors);

    let candidates = engine.dedup_candidates(Some(&batch.batch_id));
    assert_eq!(candidates.len(), 1);
    let id = candidates[0].candidate_id.to_string();

    let resolved = engine
        .resolve_duplicate(&id, Resolution::KeepBoth, "steward@clinic.org")
        .expect("resolve");
    assert_eq!(resolved.resolution, Resolution::KeepBoth);
    assert_eq!(store.row_count("patients"), 2);

    let again = engine
        .resolve_duplicate(&id, Resolution::MergeB, "someone.else@clinic.org")
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::AlreadyResolved);
    assert_eq!(store.row_count("patients"), 2);
    assert_eq!(engine.dedup_candidates(None).len(), 1);
}
