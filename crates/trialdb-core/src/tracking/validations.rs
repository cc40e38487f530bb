//! Validation lifecycle tracking.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, named_params};
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::gate::{TrialStateOracle, require_active_trial};
use crate::models::{EntityKey, JsonObj, RunState, Validation};
use crate::storage::rows::{
    optional_json_value, optional_timestamp_value, parse_optional_json_obj,
    parse_optional_timestamp, parse_text, parse_timestamp, timestamp_value,
};
use crate::storage::{
    Database, PartialUpdate, StorageError, StorageResult, UpdateColumns, insert_returning_id,
    query_all, query_one,
};
use crate::tracking::steps::{SqliteStepTracker, StepTracker};
use crate::tracking::{apply_transition, assign_once, non_empty};

const VALIDATIONS_TABLE: &str = "validations";
const VALIDATION_KEY_COLUMNS: &[&str] = &["trial_id", "total_batch"];
const SELECT_VALIDATION: &str =
    "SELECT id, trial_id, total_batch, state, start_time, end_time, metrics FROM validations";

/// Lifecycle operations for validations, addressed by `(trial_id, total_batch)`.
pub trait ValidationTracker {
    /// Records a freshly constructed validation and returns its generated id.
    fn add_validation(&self, validation: &Validation) -> LedgerResult<i64>;

    /// Looks up the validation taken at `total_batch`.
    fn validation_by_total_batch(&self, trial_id: i64, total_batch: i64)
    -> LedgerResult<Validation>;

    /// Lists a trial's validations by ascending total batch.
    fn validations_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Validation>>;

    /// Moves a validation to `new_state` and/or records its metrics.
    fn update_validation(
        &self,
        trial_id: i64,
        total_batch: i64,
        new_state: Option<RunState>,
        metrics: Option<JsonObj>,
    ) -> LedgerResult<()>;
}

fn map_validation(row: &Row) -> rusqlite::Result<Validation> {
    Ok(Validation {
        id: row.get(0)?,
        trial_id: row.get(1)?,
        total_batch: row.get(2)?,
        state: parse_text(row, 3, "state")?,
        start_time: parse_timestamp(row, 4, "start_time")?,
        end_time: parse_optional_timestamp(row, 5, "end_time")?,
        metrics: parse_optional_json_obj(row, 6, "metrics")?,
    })
}

impl UpdateColumns for Validation {
    fn column_value(&self, column: &str) -> StorageResult<Value> {
        Ok(match column {
            "id" => self.id.map_or(Value::Null, Value::Integer),
            "trial_id" => Value::Integer(self.trial_id),
            "total_batch" => Value::Integer(self.total_batch),
            "state" => Value::Text(self.state.as_str().to_string()),
            "start_time" => timestamp_value(&self.start_time),
            "end_time" => optional_timestamp_value(self.end_time.as_ref()),
            "metrics" => optional_json_value(self.metrics.as_ref())?,
            other => {
                return Err(StorageError::InvalidData(format!("validations has no column {other}")));
            }
        })
    }
}

fn load_validation(conn: &Connection, trial_id: i64, total_batch: i64) -> StorageResult<Validation> {
    query_one(
        conn,
        &format!("{SELECT_VALIDATION} WHERE trial_id = :trial_id AND total_batch = :total_batch"),
        named_params! { ":trial_id": trial_id, ":total_batch": total_batch },
        || EntityKey::validation(trial_id, total_batch).to_string(),
        map_validation,
    )
}

fn validation_exists(conn: &Connection, trial_id: i64, total_batch: i64) -> StorageResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM validations WHERE trial_id = :trial_id AND total_batch = :total_batch",
        named_params! { ":trial_id": trial_id, ":total_batch": total_batch },
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// SQLite implementation of [`ValidationTracker`].
pub struct SqliteValidationTracker<'a> {
    db: &'a Database,
    trials: &'a dyn TrialStateOracle,
    steps: SqliteStepTracker<'a>,
    require_completed_step: bool,
}

impl<'a> SqliteValidationTracker<'a> {
    /// Creates a validation tracker that requires a completed step at the
    /// validation's total batch.
    pub fn new(db: &'a Database, trials: &'a dyn TrialStateOracle) -> Self {
        Self::with_config(db, trials, &ValidationConfig::default())
    }

    pub fn with_config(
        db: &'a Database,
        trials: &'a dyn TrialStateOracle,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            db,
            trials,
            steps: SqliteStepTracker::new(db, trials),
            require_completed_step: config.require_completed_step,
        }
    }

    /// Fails unless a completed step ends exactly at `key`'s total batch.
    fn check_completed_step(&self, key: &EntityKey) -> LedgerResult<()> {
        let step = match self.steps.step_reaching_total_batch(key.trial_id, key.ordinal) {
            Ok(step) => step,
            Err(LedgerError::NotFound { .. }) => {
                warn!(entity = %key, "Rejected validation without a step at its total batch");
                return Err(LedgerError::Precondition {
                    key: *key,
                    reason: format!("no step ends at total batch {}", key.ordinal),
                });
            }
            Err(e) => return Err(e),
        };
        if step.state != RunState::Completed {
            warn!(entity = %key, step_id = step.id, state = %step.state, "Rejected validation of unfinished step");
            return Err(LedgerError::Precondition {
                key: *key,
                reason: format!("step {} is {}", step.id, step.state),
            });
        }
        Ok(())
    }
}

impl ValidationTracker for SqliteValidationTracker<'_> {
    fn add_validation(&self, validation: &Validation) -> LedgerResult<i64> {
        let key = validation.key();
        if !validation.is_new() {
            return Err(LedgerError::Precondition {
                key,
                reason: format!("validation is not freshly constructed (state {})", validation.state),
            });
        }
        require_active_trial(self.trials, &key)?;

        self.db.immediate_transaction(|tx| {
            if self.require_completed_step {
                self.check_completed_step(&key)?;
            }
            if validation_exists(tx, validation.trial_id, validation.total_batch)? {
                warn!(entity = %key, "Rejected duplicate validation");
                return Err(LedgerError::Duplicate { key });
            }

            let metrics = optional_json_value(validation.metrics.as_ref())?;
            let id = insert_returning_id(
                tx,
                "INSERT INTO validations (trial_id, total_batch, state, start_time, end_time, metrics) \
                 VALUES (:trial_id, :total_batch, :state, :start_time, :end_time, :metrics)",
                named_params! {
                    ":trial_id": validation.trial_id,
                    ":total_batch": validation.total_batch,
                    ":state": validation.state.as_str(),
                    ":start_time": timestamp_value(&validation.start_time),
                    ":end_time": optional_timestamp_value(validation.end_time.as_ref()),
                    ":metrics": metrics,
                },
            )
            .map_err(|e| LedgerError::from_insert(key, e))?;

            info!(
                trial_id = validation.trial_id,
                total_batch = validation.total_batch,
                validation_id = id,
                "Added validation"
            );
            Ok(id)
        })
    }

    fn validation_by_total_batch(
        &self,
        trial_id: i64,
        total_batch: i64,
    ) -> LedgerResult<Validation> {
        load_validation(self.db.conn(), trial_id, total_batch).map_err(|e| {
            LedgerError::from_keyed_lookup(EntityKey::validation(trial_id, total_batch), e)
        })
    }

    fn validations_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Validation>> {
        query_all(
            self.db.conn(),
            &format!("{SELECT_VALIDATION} WHERE trial_id = :trial_id ORDER BY total_batch"),
            named_params! { ":trial_id": trial_id },
            map_validation,
        )
        .map_err(LedgerError::from)
    }

    fn update_validation(
        &self,
        trial_id: i64,
        total_batch: i64,
        new_state: Option<RunState>,
        metrics: Option<JsonObj>,
    ) -> LedgerResult<()> {
        let metrics = non_empty(metrics);
        if new_state.is_none() && metrics.is_none() {
            debug!(trial_id, total_batch, "Nothing to update for validation");
            return Ok(());
        }
        let key = EntityKey::validation(trial_id, total_batch);

        self.db.immediate_transaction(|tx| {
            let mut validation =
                load_validation(tx, trial_id, total_batch)
                    .map_err(|e| LedgerError::from_keyed_lookup(key, e))?;
            let mut update = PartialUpdate::new(VALIDATIONS_TABLE);

            if let Some(to) = new_state {
                apply_transition(
                    &key,
                    &mut validation.state,
                    validation.start_time,
                    &mut validation.end_time,
                    to,
                    &mut update,
                )?;
            }
            if let Some(metrics) = metrics {
                assign_once(&key, "metrics", &mut validation.metrics, metrics, &mut update)?;
            }

            update.execute(tx, &validation, VALIDATION_KEY_COLUMNS).map_err(|e| {
                let err = LedgerError::from_update(key, e);
                if matches!(err, LedgerError::UpdateConflict { .. }) {
                    warn!(entity = %key, "Validation changed underneath guarded update");
                }
                err
            })?;
            debug!(trial_id, total_batch, columns = ?update.touched(), "Updated validation");
            Ok(())
        })
    }
}
