//! Step lifecycle tracking.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, named_params};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::gate::{TrialStateOracle, require_active_trial};
use crate::models::{EntityKey, JsonObj, RunState, Step};
use crate::storage::rows::{
    optional_json_value, optional_timestamp_value, parse_optional_json_obj,
    parse_optional_timestamp, parse_text, parse_timestamp, timestamp_value,
};
use crate::storage::{
    Database, PartialUpdate, StorageError, StorageResult, UpdateColumns, insert_returning_id,
    query_all, query_one,
};
use crate::tracking::{apply_transition, assign_once, non_empty, terminal_timestamp};

const STEPS_TABLE: &str = "steps";
const STEP_KEY_COLUMNS: &[&str] = &["trial_id", "id"];
const SELECT_STEP: &str = "SELECT trial_id, id, state, start_time, end_time, metrics, num_batches, prior_batches_processed FROM steps";

/// Lifecycle operations for steps.
pub trait StepTracker {
    /// Records a freshly constructed step for an active trial.
    fn add_step(&self, step: &Step) -> LedgerResult<()>;

    /// Records a step that is already completed, such as the placeholder step
    /// that precedes a trial's initial validation.
    fn add_no_op_step(&self, step: &Step) -> LedgerResult<()>;

    /// Looks up a step by `(trial_id, step_id)`.
    fn step_by_id(&self, trial_id: i64, step_id: i64) -> LedgerResult<Step>;

    /// Lists a trial's steps in step order.
    fn steps_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Step>>;

    /// Finds the step after which the trial had processed exactly `total_batch`
    /// batches, preferring a completed one.
    fn step_reaching_total_batch(&self, trial_id: i64, total_batch: i64) -> LedgerResult<Step>;

    /// Moves a step to `new_state` and/or records its metrics.
    ///
    /// A call with neither is a successful no-op.
    fn update_step(
        &self,
        trial_id: i64,
        step_id: i64,
        new_state: Option<RunState>,
        metrics: Option<JsonObj>,
    ) -> LedgerResult<()>;
}

fn map_step(row: &Row) -> rusqlite::Result<Step> {
    Ok(Step {
        trial_id: row.get(0)?,
        id: row.get(1)?,
        state: parse_text(row, 2, "state")?,
        start_time: parse_timestamp(row, 3, "start_time")?,
        end_time: parse_optional_timestamp(row, 4, "end_time")?,
        metrics: parse_optional_json_obj(row, 5, "metrics")?,
        num_batches: row.get(6)?,
        prior_batches_processed: row.get(7)?,
    })
}

impl UpdateColumns for Step {
    fn column_value(&self, column: &str) -> StorageResult<Value> {
        Ok(match column {
            "trial_id" => Value::Integer(self.trial_id),
            "id" => Value::Integer(self.id),
            "state" => Value::Text(self.state.as_str().to_string()),
            "start_time" => timestamp_value(&self.start_time),
            "end_time" => optional_timestamp_value(self.end_time.as_ref()),
            "metrics" => optional_json_value(self.metrics.as_ref())?,
            "num_batches" => Value::Integer(self.num_batches),
            "prior_batches_processed" => Value::Integer(self.prior_batches_processed),
            other => return Err(StorageError::InvalidData(format!("steps has no column {other}"))),
        })
    }
}

/// Rejects negative batch counts and counts whose total does not fit in an `i64`.
fn check_batch_counts(step: &Step) -> LedgerResult<()> {
    if step.num_batches < 0 || step.prior_batches_processed < 0 {
        return Err(LedgerError::Precondition {
            key: step.key(),
            reason: format!(
                "batch counts must not be negative (num_batches {}, prior_batches_processed {})",
                step.num_batches, step.prior_batches_processed
            ),
        });
    }
    if step.total_batches_processed().is_none() {
        return Err(LedgerError::Precondition {
            key: step.key(),
            reason: "total batches processed overflows".to_string(),
        });
    }
    Ok(())
}

fn load_step(conn: &Connection, trial_id: i64, step_id: i64) -> StorageResult<Step> {
    query_one(
        conn,
        &format!("{SELECT_STEP} WHERE trial_id = :trial_id AND id = :id"),
        named_params! { ":trial_id": trial_id, ":id": step_id },
        || EntityKey::step(trial_id, step_id).to_string(),
        map_step,
    )
}

/// SQLite implementation of [`StepTracker`].
pub struct SqliteStepTracker<'a> {
    db: &'a Database,
    trials: &'a dyn TrialStateOracle,
}

impl<'a> SqliteStepTracker<'a> {
    /// Creates a step tracker gated on `trials`.
    pub fn new(db: &'a Database, trials: &'a dyn TrialStateOracle) -> Self {
        Self { db, trials }
    }

    fn insert(&self, step: &Step) -> LedgerResult<()> {
        let key = step.key();
        let metrics = optional_json_value(step.metrics.as_ref())?;
        insert_returning_id(
            self.db.conn(),
            "INSERT INTO steps (trial_id, id, state, start_time, end_time, metrics, num_batches, prior_batches_processed) \
             VALUES (:trial_id, :id, :state, :start_time, :end_time, :metrics, :num_batches, :prior_batches_processed)",
            named_params! {
                ":trial_id": step.trial_id,
                ":id": step.id,
                ":state": step.state.as_str(),
                ":start_time": timestamp_value(&step.start_time),
                ":end_time": optional_timestamp_value(step.end_time.as_ref()),
                ":metrics": metrics,
                ":num_batches": step.num_batches,
                ":prior_batches_processed": step.prior_batches_processed,
            },
        )
        .map_err(|e| {
            let err = LedgerError::from_insert(key, e);
            if matches!(err, LedgerError::Duplicate { .. }) {
                warn!(entity = %key, "Rejected duplicate step");
            }
            err
        })?;
        info!(trial_id = step.trial_id, step_id = step.id, state = %step.state, "Added step");
        Ok(())
    }
}

impl StepTracker for SqliteStepTracker<'_> {
    fn add_step(&self, step: &Step) -> LedgerResult<()> {
        let key = step.key();
        if !step.is_new() {
            return Err(LedgerError::Precondition {
                key,
                reason: format!("step is not freshly constructed (state {})", step.state),
            });
        }
        check_batch_counts(step)?;
        require_active_trial(self.trials, &key)?;
        self.insert(step)
    }

    fn add_no_op_step(&self, step: &Step) -> LedgerResult<()> {
        let key = step.key();
        if step.state != RunState::Completed {
            return Err(LedgerError::Precondition {
                key,
                reason: format!("no-op step must be {}, got {}", RunState::Completed, step.state),
            });
        }
        check_batch_counts(step)?;
        require_active_trial(self.trials, &key)?;

        let mut step = step.clone();
        step.end_time = Some(match step.end_time {
            Some(end) => end.max(step.start_time),
            None => terminal_timestamp(step.start_time),
        });
        self.insert(&step)
    }

    fn step_by_id(&self, trial_id: i64, step_id: i64) -> LedgerResult<Step> {
        load_step(self.db.conn(), trial_id, step_id)
            .map_err(|e| LedgerError::from_keyed_lookup(EntityKey::step(trial_id, step_id), e))
    }

    fn steps_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Step>> {
        query_all(
            self.db.conn(),
            &format!("{SELECT_STEP} WHERE trial_id = :trial_id ORDER BY id"),
            named_params! { ":trial_id": trial_id },
            map_step,
        )
        .map_err(LedgerError::from)
    }

    fn step_reaching_total_batch(&self, trial_id: i64, total_batch: i64) -> LedgerResult<Step> {
        query_one(
            self.db.conn(),
            &format!(
                "{SELECT_STEP} WHERE trial_id = :trial_id \
                 AND prior_batches_processed + num_batches = :total_batch \
                 ORDER BY state = :completed DESC, id DESC LIMIT 1"
            ),
            named_params! {
                ":trial_id": trial_id,
                ":total_batch": total_batch,
                ":completed": RunState::Completed.as_str(),
            },
            || format!("step of trial {trial_id} ending at total batch {total_batch}"),
            map_step,
        )
        .map_err(LedgerError::from_lookup)
    }

    fn update_step(
        &self,
        trial_id: i64,
        step_id: i64,
        new_state: Option<RunState>,
        metrics: Option<JsonObj>,
    ) -> LedgerResult<()> {
        let metrics = non_empty(metrics);
        if new_state.is_none() && metrics.is_none() {
            debug!(trial_id, step_id, "Nothing to update for step");
            return Ok(());
        }
        let key = EntityKey::step(trial_id, step_id);

        self.db.immediate_transaction(|tx| {
            let mut step =
                load_step(tx, trial_id, step_id).map_err(|e| LedgerError::from_keyed_lookup(key, e))?;
            let mut update = PartialUpdate::new(STEPS_TABLE);

            if let Some(to) = new_state {
                apply_transition(
                    &key,
                    &mut step.state,
                    step.start_time,
                    &mut step.end_time,
                    to,
                    &mut update,
                )?;
            }
            if let Some(metrics) = metrics {
                assign_once(&key, "metrics", &mut step.metrics, metrics, &mut update)?;
            }

            update.execute(tx, &step, STEP_KEY_COLUMNS).map_err(|e| {
                let err = LedgerError::from_update(key, e);
                if matches!(err, LedgerError::UpdateConflict { .. }) {
                    warn!(entity = %key, "Step changed underneath guarded update");
                }
                err
            })?;
            debug!(trial_id, step_id, columns = ?update.touched(), "Updated step");
            Ok(())
        })
    }
}
