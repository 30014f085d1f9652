mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{
    clinic_schema, confirm, confirm_patients, executor, executor_with, patient_dataset, test_config,
};
use edm_core::{InMemoryStore, MigrationExecutor, TargetStore, snapshot_checksum};
use edm_model::{
    BatchStatus, CellValue, Dataset, ErrorKind, ExecutionOptions, Record, RetryStatus,
    SnapshotType, TableData,
};

fn seeded_tables() -> BTreeMap<String, TableData> {
    let existing = Record::from([
        ("mrn".to_string(), CellValue::text("LEGACY-9")),
        ("first_name".to_string(), CellValue::text("Zed")),
        ("last_name".to_string(), CellValue::text("Archer")),
        ("birth_date".to_string(), CellValue::text("1901-12-31")),
    ]);
    BTreeMap::from([(
        "patients".to_string(),
        TableData::from([("legacy:1".to_string(), existing)]),
    )])
}

#[test]
fn rollback_restores_tables_exactly() {
    let seed = seeded_tables();
    let store = Arc::new(InMemoryStore::with_tables(seed.clone()));
    let executor = executor(store.clone());
    let confirmed = confirm_patients(&clinic_schema());

    let batch = executor
        .execute(patient_dataset(5, &[]), &confirmed, ExecutionOptions::default())
        .expect("execute");
    assert_eq!(store.row_count("patients"), 6);

    let snapshot_id = batch.snapshot_id.expect("pre-migration snapshot");
    let snapshot = executor.snapshots().get(&snapshot_id).expect("snapshot");
    assert_eq!(snapshot.snapshot_type, SnapshotType::PreMigration);
    assert_eq!(snapshot.tables_included, vec!["patients".to_string()]);
    assert_eq!(snapshot.total_rows, 1);
    assert_eq!(snapshot.snapshot_data, seed);
    assert_eq!(
        snapshot_checksum(&snapshot.snapshot_data).expect("checksum").0,
        snapshot.checksum
    );

    let event = executor
        .snapshots()
        .rollback(&snapshot_id, "bad source extract", "ops.lead@clinic.org", Utc::now())
        .expect("rollback");
    assert_eq!(event.rows_restored, 1);
    assert_eq!(store.read_table("patients").expect("read"), seed["patients"]);
    assert_eq!(executor.snapshots().rollback_events(), vec![event]);
}

#[test]
fn rollback_is_rejected_while_a_batch_holds_the_tables() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());
    let confirmed = confirm_patients(&clinic_schema());

    let mut run = executor
        .start(patient_dataset(4, &[]), &confirmed, ExecutionOptions::default())
        .expect("start");
    let snapshot_id = executor
        .batch(run.batch_id())
        .and_then(|b| b.snapshot_id)
        .expect("snapshot id");
    run.step(2).expect("step");

    let error = executor
        .snapshots()
        .rollback(&snapshot_id, "abort", "ops.lead@clinic.org", Utc::now())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConcurrentMigrationInProgress);
    assert_eq!(store.row_count("patients"), 2);
    assert!(executor.snapshots().rollback_events().is_empty());

    run.run_to_completion().expect("run");
    drop(run);
    executor
        .snapshots()
        .rollback(&snapshot_id, "abort", "ops.lead@clinic.org", Utc::now())
        .expect("rollback after release");
    assert_eq!(store.row_count("patients"), 0);
}

fn tagged(value: &str) -> Record {
    Record::from([("tag".to_string(), CellValue::text(value))])
}

#[test]
fn failed_restore_leaves_every_table_as_it_was() {
    let store = Arc::new(InMemoryStore::with_tables(BTreeMap::from([
        (
            "hc_staff".to_string(),
            TableData::from([("s1".to_string(), tagged("before"))]),
        ),
        (
            "patients".to_string(),
            TableData::from([("p1".to_string(), tagged("before"))]),
        ),
    ])));
    let executor = executor(store.clone());
    let tables = vec!["hc_staff".to_string(), "patients".to_string()];
    let snapshot = executor
        .snapshots()
        .create_snapshot(&tables, "nightly", SnapshotType::Manual, None)
        .expect("snapshot");

    store.upsert("hc_staff", "s1", tagged("after")).expect("write");
    store.upsert("patients", "p1", tagged("after")).expect("write");
    let after = BTreeMap::from([
        ("hc_staff", store.read_table("hc_staff").expect("read")),
        ("patients", store.read_table("patients").expect("read")),
    ]);

    store.fail_replaces("patients");
    let error = executor
        .snapshots()
        .rollback(snapshot.snapshot_id.as_str(), "restore nightly", "ops.lead@clinic.org", Utc::now())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TransientInfra);

    for (table, rows) in &after {
        assert_eq!(&store.read_table(table).expect("read"), rows, "{table} changed");
    }
    assert!(executor.snapshots().rollback_events().is_empty());
    assert!(!executor.locks().is_locked("hc_staff"));

    store.clear_faults();
    let event = executor
        .snapshots()
        .rollback(snapshot.snapshot_id.as_str(), "restore nightly", "ops.lead@clinic.org", Utc::now())
        .expect("rollback once the store recovers");
    assert_eq!(event.rows_restored, 2);
    assert_eq!(store.get("patients", "p1").expect("get"), Some(tagged("before")));
    assert_eq!(store.get("hc_staff", "s1").expect("get"), Some(tagged("before")));
}

#[test]
fn rollback_waits_for_batches_with_queued_retries() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());

    let mut run = executor
        .start(
            patient_dataset(3, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start");
    let batch_id = run.batch_id().clone();
    store.fail_writes("patients", &format!("{batch_id}:2"), 1);
    let batch = run.run_to_completion().expect("run");
    drop(run);
    assert_eq!(batch.status, BatchStatus::Processing);
    assert_eq!(store.row_count("patients"), 2);
    let snapshot_id = batch.snapshot_id.expect("snapshot id");

    let error = executor
        .snapshots()
        .rollback(&snapshot_id, "bad extract", "ops.lead@clinic.org", Utc::now())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConcurrentMigrationInProgress);
    assert!(error.to_string().contains(batch_id.as_str()));
    assert_eq!(store.row_count("patients"), 2);
    assert!(executor.snapshots().rollback_events().is_empty());

    let report = executor
        .process_retries(Utc::now() + Duration::hours(1))
        .expect("retry pass");
    assert_eq!(report.finalized, vec![(batch_id.clone(), BatchStatus::Completed)]);
    let batch = executor.batch(&batch_id).expect("batch");
    assert_eq!(batch.success_count, 3);
    assert_eq!(store.row_count("patients"), 3);

    executor
        .snapshots()
        .rollback(&snapshot_id, "bad extract", "ops.lead@clinic.org", Utc::now())
        .expect("rollback after the batch settled");
    assert_eq!(store.row_count("patients"), 0);
}

#[test]
fn open_batches_block_rollback_after_a_restart() {
    let store = Arc::new(InMemoryStore::new());
    let first = executor(store.clone());
    let mut run = first
        .start(
            patient_dataset(2, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start");
    let batch_id = run.batch_id().clone();
    store.fail_writes("patients", &format!("{batch_id}:1"), 1);
    run.run_to_completion().expect("run");
    drop(run);
    let state = first.export_state();
    drop(first);

    let dyn_store: Arc<dyn TargetStore> = store.clone();
    let restarted =
        MigrationExecutor::with_state(Arc::new(clinic_schema()), dyn_store, &test_config(), state)
            .expect("restore");
    assert!(restarted.locks().claimed_by(batch_id.as_str()).contains("patients"));

    let snapshot = restarted
        .snapshots()
        .create_snapshot(&["patients".to_string()], "manual", SnapshotType::Manual, None)
        .expect("snapshot");
    let error = restarted
        .snapshots()
        .rollback(snapshot.snapshot_id.as_str(), "undo", "ops.lead@clinic.org", Utc::now())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConcurrentMigrationInProgress);
    assert!(error.to_string().contains(batch_id.as_str()));
}

#[test]
fn busy_table_only_defers_its_own_retries() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());

    let mut patients = executor
        .start(
            patient_dataset(2, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start patients");
    let patient_batch = patients.batch_id().clone();
    store.fail_writes("patients", &format!("{patient_batch}:1"), 1);
    patients.run_to_completion().expect("run patients");
    drop(patients);

    let staff = Dataset::from_text_rows(
        "staff.csv",
        "csv",
        vec![vec![("NPI", "1234567893"), ("Name", "Ada Lovelace")]],
    );
    let staff_confirmed = confirm(
        &clinic_schema(),
        "staff.csv",
        &[("NPI", "hc_staff", "npi"), ("Name", "hc_staff", "full_name")],
    );
    let mut run = executor
        .start(staff, &staff_confirmed, ExecutionOptions::default())
        .expect("start staff");
    let staff_batch = run.batch_id().clone();
    store.fail_writes("hc_staff", &format!("{staff_batch}:1"), 1);
    run.run_to_completion().expect("run staff");
    drop(run);

    let busy = executor
        .locks()
        .acquire(["patients"], "dedup:manual-review")
        .expect("hold patients");
    let later = Utc::now() + Duration::hours(1);
    let report = executor.process_retries(later).expect("retry pass");
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].batch_id, staff_batch);
    assert_eq!(report.finalized, vec![(staff_batch.clone(), BatchStatus::Completed)]);
    assert_eq!(
        executor.retries().for_batch(&patient_batch)[0].status,
        RetryStatus::Pending
    );

    drop(busy);
    let report = executor.process_retries(later).expect("second pass");
    assert_eq!(report.finalized, vec![(patient_batch, BatchStatus::Completed)]);
    assert_eq!(store.row_count("hc_staff"), 1);
    assert_eq!(store.row_count("patients"), 2);
}

#[test]
fn rollback_preconditions_leave_tables_alone() {
    let mut config = test_config();
    config.snapshot.retention_hours = Some(24);
    let store = Arc::new(InMemoryStore::new());
    let executor = executor_with(store.clone(), &config);
    let batch = executor
        .execute(
            patient_dataset(3, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("execute");
    let snapshot_id = batch.snapshot_id.expect("snapshot id");

    let missing = executor
        .snapshots()
        .rollback("snap-unknown", "typo", "ops.lead@clinic.org", Utc::now())
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::SnapshotNotFound);

    let expired = executor
        .snapshots()
        .rollback(&snapshot_id, "too late", "ops.lead@clinic.org", Utc::now() + Duration::hours(25))
        .unwrap_err();
    assert_eq!(expired.kind(), ErrorKind::SnapshotNotFound);

    let anonymous = executor
        .snapshots()
        .rollback(&snapshot_id, "no approver", "  ", Utc::now())
        .unwrap_err();
    assert_eq!(anonymous.kind(), ErrorKind::InvalidInput);

    assert_eq!(store.row_count("patients"), 3);
    assert_eq!(executor.snapshots().purge_expired(Utc::now() + Duration::hours(25)).expect("purge"), 1);
}

#[test]
fn snapshot_failure_aborts_before_any_write() {
    let store = Arc::new(InMemoryStore::with_tables(seeded_tables()));
    store.fail_reads("patients");
    let executor = executor(store.clone());

    let error = executor
        .execute(
            patient_dataset(5, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Snapshot);

    let batches = executor.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert_eq!(batches[0].success_count, 0);
    assert!(batches[0].failure_reason.is_some());
    assert!(batches[0].counters_consistent());

    store.clear_faults();
    assert_eq!(store.read_table("patients").expect("read"), seeded_tables()["patients"]);
    assert!(!executor.locks().is_locked("patients"));
}

#[test]
fn transient_write_is_retried_and_batch_completes() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());

    let mut run = executor
        .start(
            patient_dataset(5, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start");
    let batch_id = run.batch_id().clone();
    store.fail_writes("patients", &format!("{batch_id}:3"), 1);
    let batch = run.run_to_completion().expect("run");
    drop(run);

    assert_eq!(batch.status, BatchStatus::Processing);
    assert_eq!(batch.success_count, 4);
    assert_eq!(batch.pending_count, 1);
    assert!(batch.counters_consistent());

    let items = executor.retries().for_batch(&batch_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].error_code, "TRANSIENT_INFRA");
    assert_eq!(items[0].source_row_numbers, vec![3]);
    assert_eq!(items[0].status, RetryStatus::Pending);

    let early = executor.process_retries(Utc::now()).expect("early pass");
    assert!(early.outcomes.is_empty());

    let report = executor
        .process_retries(Utc::now() + Duration::hours(1))
        .expect("retry pass");
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, RetryStatus::Succeeded);
    assert_eq!(report.finalized, vec![(batch_id.clone(), BatchStatus::Completed)]);

    let batch = executor.batch(&batch_id).expect("batch");
    assert_eq!(batch.success_count, 5);
    assert_eq!(batch.pending_count, 0);
    assert_eq!(store.row_count("patients"), 5);
    assert_eq!(executor.lineage().records_for_row(&batch_id, 3).len(), 5);
    assert!(executor.quality(&batch_id).is_some());
}

#[test]
fn exhausted_retries_fail_the_row() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());

    let mut run = executor
        .start(
            patient_dataset(5, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start");
    let batch_id = run.batch_id().clone();
    store.fail_writes("patients", &format!("{batch_id}:2"), 10);
    run.run_to_completion().expect("run");
    drop(run);

    let start = Utc::now();
    let mut finalized = Vec::new();
    for hour in 1..=4 {
        let report = executor
            .process_retries(start + Duration::hours(hour))
            .expect("retry pass");
        finalized.extend(report.finalized);
    }
    assert_eq!(finalized, vec![(batch_id.clone(), BatchStatus::CompletedWithErrors)]);

    let item = &executor.retries().for_batch(&batch_id)[0];
    assert_eq!(item.status, RetryStatus::Exhausted);
    assert_eq!(item.attempt_number, 3);

    let batch = executor.batch(&batch_id).expect("batch");
    assert_eq!(batch.success_count, 4);
    assert_eq!(batch.error_count, 1);
    assert!(batch.counters_consistent());
    let failures = executor.failures(&batch_id);
    assert_eq!(failures[0].rule, "retry.exhausted");
    assert_eq!(failures[0].source_row, 2);
    assert_eq!(failures[0].kind, ErrorKind::TransientInfra);
    assert_eq!(store.row_count("patients"), 4);
}

#[test]
fn transient_failure_is_permanent_without_retry_logic() {
    let store = Arc::new(InMemoryStore::new());
    let executor = executor(store.clone());

    let mut run = executor
        .start(
            patient_dataset(3, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default().with_retry(false),
        )
        .expect("start");
    store.fail_writes("patients", &format!("{}:1", run.batch_id()), 1);
    let batch = run.run_to_completion().expect("run");

    assert_eq!(batch.status, BatchStatus::CompletedWithErrors);
    assert_eq!(batch.error_count, 1);
    assert!(executor.retries().items().is_empty());
    let failures = executor.failures(&batch.batch_id);
    assert_eq!(failures[0].kind, ErrorKind::TransientInfra);
    assert_eq!(failures[0].rule, "write");
}

#[test]
fn pending_retries_survive_a_restart() {
    let store = Arc::new(InMemoryStore::new());
    let first = executor(store.clone());
    let mut run = first
        .start(
            patient_dataset(4, &[]),
            &confirm_patients(&clinic_schema()),
            ExecutionOptions::default(),
        )
        .expect("start");
    let batch_id = run.batch_id().clone();
    store.fail_writes("patients", &format!("{batch_id}:4"), 1);
    run.run_to_completion().expect("run");
    drop(run);

    let json = serde_json::to_string(&first.export_state()).expect("serialize state");
    drop(first);

    let dyn_store: Arc<dyn TargetStore> = store.clone();
    let restarted = MigrationExecutor::with_state(
        Arc::new(clinic_schema()),
        dyn_store,
        &test_config(),
        serde_json::from_str(&json).expect("parse state"),
    )
    .expect("restore");
    assert_eq!(
        restarted.batch(&batch_id).expect("batch").status,
        BatchStatus::Processing
    );

    let report = restarted
        .process_retries(Utc::now() + Duration::hours(1))
        .expect("retry pass");
    assert_eq!(report.finalized, vec![(batch_id.clone(), BatchStatus::Completed)]);
    assert_eq!(store.row_count("patients"), 4);
}
