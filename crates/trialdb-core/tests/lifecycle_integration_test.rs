//! End-to-end lifecycle tests against a file-backed ledger.

use serde_json::json;
use tempfile::TempDir;
use trialdb_core::{
    Checkpoint, CheckpointPatch, CheckpointTracker, Config, Database, EntityKind, JsonObj,
    LedgerError, RunState, SqliteCheckpointTracker, SqliteStepTracker, SqliteTrialRepository,
    SqliteValidationTracker, Step, StepTracker, Trial, TrialState, Validation, ValidationConfig,
    ValidationTracker, policy,
};

fn obj(value: serde_json::Value) -> JsonObj {
    value.as_object().cloned().expect("Expected a JSON object")
}

/// Opens a fresh file-backed ledger with trial 5 registered.
fn setup() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.database.path = temp_dir.path().join("ledger.sqlite3");
    let db = Database::open_with_config(&config.database).expect("Failed to open database");
    SqliteTrialRepository::new(&db).create(&Trial::new(5)).expect("Failed to register trial");
    (temp_dir, db)
}

#[test]
fn test_step_report_lifecycle() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let steps = SqliteStepTracker::new(&db, &trials);

    let step = Step::new(5, 1, 100, 0);
    let t0 = step.start_time;
    steps.add_step(&step).expect("Failed to add step");

    steps
        .update_step(5, 1, Some(RunState::Completed), Some(obj(json!({"loss": 0.1}))))
        .expect("Failed to complete step");
    let stored = steps.step_by_id(5, 1).expect("Step should exist");
    assert_eq!(stored.state, RunState::Completed);
    assert!(stored.end_time.expect("end_time should be set") >= t0);

    let err = steps.update_step(5, 1, None, Some(obj(json!({"loss": 0.2})))).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadySet { .. }));
    let stored = steps.step_by_id(5, 1).expect("Step should exist");
    assert_eq!(stored.metrics, Some(obj(json!({"loss": 0.1}))));
}

#[test]
fn test_checkpoint_added_once() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let checkpoints = SqliteCheckpointTracker::new(&db, &trials);

    checkpoints.add_checkpoint(&Checkpoint::new(5, 100)).expect("Failed to add checkpoint");
    let err = checkpoints.add_checkpoint(&Checkpoint::new(5, 100)).unwrap_err();
    assert!(matches!(err, LedgerError::Duplicate { .. }));
}

#[test]
fn test_metadata_merge_keeps_existing_keys() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let checkpoints = SqliteCheckpointTracker::new(&db, &trials);
    checkpoints.add_checkpoint(&Checkpoint::new(5, 100)).expect("Failed to add checkpoint");

    for metadata in [json!({"a": 1}), json!({"b": 2})] {
        checkpoints
            .update_checkpoint(5, 100, CheckpointPatch::default().with_metadata(obj(metadata)))
            .expect("Failed to merge metadata");
    }

    let stored = checkpoints.checkpoint_by_total_batch(5, 100).expect("Checkpoint should exist");
    assert_eq!(stored.metadata, obj(json!({"a": 1, "b": 2})));
}

#[test]
fn test_non_fresh_entities_are_rejected_for_every_kind() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);

    let mut step = Step::new(5, 1, 100, 0);
    step.metrics = Some(obj(json!({"loss": 1.0})));
    let err = SqliteStepTracker::new(&db, &trials).add_step(&step).unwrap_err();
    assert!(matches!(err, LedgerError::Precondition { .. }));

    let mut validation = Validation::new(5, 0);
    validation.state = RunState::Completed;
    let err = SqliteValidationTracker::new(&db, &trials).add_validation(&validation).unwrap_err();
    assert!(matches!(err, LedgerError::Precondition { .. }));

    let mut checkpoint = Checkpoint::new(5, 100);
    checkpoint.end_time = Some(checkpoint.start_time);
    let err = SqliteCheckpointTracker::new(&db, &trials).add_checkpoint(&checkpoint).unwrap_err();
    assert!(matches!(err, LedgerError::Precondition { .. }));
}

#[test]
fn test_illegal_transitions_leave_state_unchanged_for_every_kind() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let steps = SqliteStepTracker::new(&db, &trials);
    let unchecked = ValidationConfig { require_completed_step: false };
    let validations = SqliteValidationTracker::with_config(&db, &trials, &unchecked);
    let checkpoints = SqliteCheckpointTracker::new(&db, &trials);

    let illegal = RunState::ALL.into_iter().flat_map(|from| {
        RunState::ALL
            .into_iter()
            .map(move |to| (from, to))
            .filter(|&(from, to)| !policy::is_legal(EntityKind::Step, from, to))
    });

    for (ordinal, (from, to)) in (1_i64..).zip(illegal) {
        let total_batch = ordinal * 100;
        let reach = |state: RunState| (state != RunState::Active).then_some(state);

        steps.add_step(&Step::new(5, ordinal, 100, total_batch - 100)).unwrap();
        steps.update_step(5, ordinal, reach(from), None).unwrap();
        let err = steps.update_step(5, ordinal, Some(to), None).unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }), "step {from} -> {to}");
        assert_eq!(steps.step_by_id(5, ordinal).unwrap().state, from);

        validations.add_validation(&Validation::new(5, total_batch)).unwrap();
        validations.update_validation(5, total_batch, reach(from), None).unwrap();
        let err = validations.update_validation(5, total_batch, Some(to), None).unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }), "validation {from} -> {to}");
        assert_eq!(validations.validation_by_total_batch(5, total_batch).unwrap().state, from);

        checkpoints.add_checkpoint(&Checkpoint::new(5, total_batch)).unwrap();
        if let Some(state) = reach(from) {
            checkpoints
                .update_checkpoint(5, total_batch, CheckpointPatch::default().with_state(state))
                .unwrap();
        }
        let err = checkpoints
            .update_checkpoint(5, total_batch, CheckpointPatch::default().with_state(to))
            .unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }), "checkpoint {from} -> {to}");
        assert_eq!(checkpoints.checkpoint_by_total_batch(5, total_batch).unwrap().state, from);
    }
}

#[test]
fn test_paused_trial_blocks_new_work_but_not_updates() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let steps = SqliteStepTracker::new(&db, &trials);
    steps.add_step(&Step::new(5, 1, 100, 0)).expect("Failed to add step");

    trials.set_state(5, TrialState::Paused).expect("Failed to pause trial");
    let err = steps.add_step(&Step::new(5, 2, 100, 100)).unwrap_err();
    assert!(matches!(err, LedgerError::Precondition { .. }));

    steps
        .update_step(5, 1, Some(RunState::Completed), None)
        .expect("Updates do not consult the trial gate");
}

#[test]
fn test_validation_follows_completed_step() {
    let (_temp_dir, db) = setup();
    let trials = SqliteTrialRepository::new(&db);
    let steps = SqliteStepTracker::new(&db, &trials);
    let validations = SqliteValidationTracker::new(&db, &trials);

    steps.add_no_op_step(&Step::no_op(5, 0, 0)).expect("Failed to add no-op step");
    validations.add_validation(&Validation::new(5, 0)).expect("Initial validation");

    steps.add_step(&Step::new(5, 1, 100, 0)).expect("Failed to add step");
    assert!(matches!(
        validations.add_validation(&Validation::new(5, 100)),
        Err(LedgerError::Precondition { .. })
    ));
    steps.update_step(5, 1, Some(RunState::Completed), None).expect("Failed to complete step");
    validations.add_validation(&Validation::new(5, 100)).expect("Validation after step");

    let listed: Vec<i64> = validations
        .validations_for_trial(5)
        .expect("Failed to list validations")
        .iter()
        .map(|v| v.total_batch)
        .collect();
    assert_eq!(listed, vec![0, 100]);
}
