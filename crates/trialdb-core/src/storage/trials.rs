//! Minimal trial registry backing the SQLite trial gate.
//!
//! Trial lifecycles are driven elsewhere; this repository exists so that a
//! standalone ledger has trials to gate on, and so operators can register and
//! pause them.

use rusqlite::named_params;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::gate::TrialStateOracle;
use crate::models::{Trial, TrialState};
use crate::storage::database::{Database, execute_exactly, insert_returning_id, query_one};
use crate::storage::error::StorageError;
use crate::storage::rows::parse_text;

/// SQLite implementation of the trial registry.
pub struct SqliteTrialRepository<'a> {
    db: &'a Database,
}

impl<'a> SqliteTrialRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Registers a trial.
    ///
    /// # Errors
    /// * `StorageError::UniqueViolation` - If the trial is already registered
    pub fn create(&self, trial: &Trial) -> Result<(), StorageError> {
        insert_returning_id(
            self.db.conn(),
            "INSERT INTO trials (id, state) VALUES (:id, :state)",
            named_params! { ":id": trial.id, ":state": trial.state.as_str() },
        )?;
        info!(trial_id = trial.id, state = %trial.state, "Registered trial");
        Ok(())
    }

    /// Retrieves a trial by ID.
    pub fn get_by_id(&self, id: i64) -> Result<Trial, StorageError> {
        query_one(
            self.db.conn(),
            "SELECT id, state FROM trials WHERE id = :id",
            named_params! { ":id": id },
            || format!("trial {id}"),
            |row| Ok(Trial { id: row.get(0)?, state: parse_text(row, 1, "state")? }),
        )
    }

    /// Moves a trial to `state`. Trial transitions are not policed here.
    pub fn set_state(&self, id: i64, state: TrialState) -> Result<(), StorageError> {
        execute_exactly(
            self.db.conn(),
            "UPDATE trials SET state = :state WHERE id = :id",
            named_params! { ":id": id, ":state": state.as_str() },
            1,
        )
        .map_err(|e| match e {
            StorageError::RowCount { actual: 0, .. } => StorageError::NotFound(format!("trial {id}")),
            other => other,
        })?;
        info!(trial_id = id, %state, "Updated trial state");
        Ok(())
    }
}

impl TrialStateOracle for SqliteTrialRepository<'_> {
    fn trial_state(&self, trial_id: i64) -> LedgerResult<TrialState> {
        self.get_by_id(trial_id).map(|trial| trial.state).map_err(LedgerError::from_lookup)
    }
}
