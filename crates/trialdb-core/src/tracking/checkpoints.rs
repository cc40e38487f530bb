//! Checkpoint lifecycle tracking.
//!
//! Checkpoints differ from steps and validations in what an update may carry:
//! besides state they take four write-once descriptors (`uuid`, `resources`,
//! `framework`, `format`) and a `metadata` map that is merged key by key rather
//! than replaced. Metadata may also be enriched after the checkpoint is final
//! through [`CheckpointTracker::update_checkpoint_metadata`], which skips every
//! lifecycle check.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, named_params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::gate::{TrialStateOracle, require_active_trial};
use crate::models::{Checkpoint, CheckpointPatch, EntityKey, RunState};
use crate::storage::rows::{
    optional_json_value, optional_text_value, optional_timestamp_value, parse_optional_json_obj,
    parse_optional_text, parse_optional_timestamp, parse_text, parse_timestamp, timestamp_value,
};
use crate::storage::{
    Database, PartialUpdate, StorageError, StorageResult, UpdateColumns, insert_returning_id,
    query_all, query_one,
};
use crate::tracking::{apply_transition, assign_once, merge_keys};

const CHECKPOINTS_TABLE: &str = "checkpoints";
const CHECKPOINT_KEY_COLUMNS: &[&str] = &["trial_id", "total_batch"];
const SELECT_CHECKPOINT: &str = "SELECT id, trial_id, total_batch, state, start_time, end_time, uuid, resources, metadata, framework, format, version FROM checkpoints";

/// Lifecycle operations for checkpoints, addressed by `(trial_id, total_batch)`.
pub trait CheckpointTracker {
    /// Records a freshly constructed checkpoint and returns its generated id.
    fn add_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<i64>;

    fn checkpoint_by_total_batch(&self, trial_id: i64, total_batch: i64)
    -> LedgerResult<Checkpoint>;

    fn checkpoint_by_uuid(&self, uuid: Uuid) -> LedgerResult<Checkpoint>;

    /// Returns the completed checkpoint with the highest total batch.
    fn latest_checkpoint_for_trial(&self, trial_id: i64) -> LedgerResult<Checkpoint>;

    /// Lists a trial's checkpoints by ascending total batch.
    fn checkpoints_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Checkpoint>>;

    /// Applies `patch` field by field. A patch that carries nothing is a
    /// successful no-op.
    fn update_checkpoint(
        &self,
        trial_id: i64,
        total_batch: i64,
        patch: CheckpointPatch,
    ) -> LedgerResult<()>;

    /// Overwrites the stored metadata of the checkpoint with `checkpoint.id`.
    ///
    /// No trial or lifecycle checks apply; this is for enriching a checkpoint
    /// after it is otherwise final.
    fn update_checkpoint_metadata(&self, checkpoint: &Checkpoint) -> LedgerResult<()>;
}

fn map_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get(0)?,
        trial_id: row.get(1)?,
        total_batch: row.get(2)?,
        state: parse_text(row, 3, "state")?,
        start_time: parse_timestamp(row, 4, "start_time")?,
        end_time: parse_optional_timestamp(row, 5, "end_time")?,
        uuid: parse_optional_text(row, 6, "uuid")?,
        resources: parse_optional_json_obj(row, 7, "resources")?,
        metadata: parse_optional_json_obj(row, 8, "metadata")?.unwrap_or_default(),
        framework: row.get(9)?,
        format: row.get(10)?,
        version: row.get(11)?,
    })
}

fn uuid_value(uuid: Option<&Uuid>) -> Value {
    uuid.filter(|u| !u.is_nil()).map_or(Value::Null, |u| Value::Text(u.to_string()))
}

impl UpdateColumns for Checkpoint {
    fn column_value(&self, column: &str) -> StorageResult<Value> {
        Ok(match column {
            "id" => self.id.map_or(Value::Null, Value::Integer),
            "trial_id" => Value::Integer(self.trial_id),
            "total_batch" => Value::Integer(self.total_batch),
            "state" => Value::Text(self.state.as_str().to_string()),
            "start_time" => timestamp_value(&self.start_time),
            "end_time" => optional_timestamp_value(self.end_time.as_ref()),
            "uuid" => uuid_value(self.uuid.as_ref()),
            "resources" => optional_json_value(self.resources.as_ref())?,
            "metadata" => optional_json_value(Some(&self.metadata))?,
            "framework" => optional_text_value(self.framework.as_deref()),
            "format" => optional_text_value(self.format.as_deref()),
            "version" => Value::Text(self.version.clone()),
            other => {
                return Err(StorageError::InvalidData(format!("checkpoints has no column {other}")));
            }
        })
    }
}

fn load_checkpoint(conn: &Connection, trial_id: i64, total_batch: i64) -> StorageResult<Checkpoint> {
    query_one(
        conn,
        &format!("{SELECT_CHECKPOINT} WHERE trial_id = :trial_id AND total_batch = :total_batch"),
        named_params! { ":trial_id": trial_id, ":total_batch": total_batch },
        || EntityKey::checkpoint(trial_id, total_batch).to_string(),
        map_checkpoint,
    )
}

fn checkpoint_exists(conn: &Connection, trial_id: i64, total_batch: i64) -> StorageResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM checkpoints WHERE trial_id = :trial_id AND total_batch = :total_batch",
        named_params! { ":trial_id": trial_id, ":total_batch": total_batch },
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// SQLite implementation of [`CheckpointTracker`].
pub struct SqliteCheckpointTracker<'a> {
    db: &'a Database,
    trials: &'a dyn TrialStateOracle,
}

impl<'a> SqliteCheckpointTracker<'a> {
    pub fn new(db: &'a Database, trials: &'a dyn TrialStateOracle) -> Self {
        Self { db, trials }
    }

    fn write(
        update: &PartialUpdate,
        conn: &Connection,
        checkpoint: &Checkpoint,
        key: EntityKey,
        key_columns: &[&str],
    ) -> LedgerResult<()> {
        update.execute(conn, checkpoint, key_columns).map_err(|e| {
            let err = LedgerError::from_update(key, e);
            match &err {
                LedgerError::UpdateConflict { .. } => {
                    warn!(entity = %key, "Checkpoint changed underneath guarded update");
                }
                LedgerError::Duplicate { .. } => {
                    warn!(entity = %key, "Rejected checkpoint UUID already in use");
                }
                _ => {}
            }
            err
        })
    }
}

impl CheckpointTracker for SqliteCheckpointTracker<'_> {
    fn add_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<i64> {
        let key = checkpoint.key();
        if !checkpoint.is_new() {
            return Err(LedgerError::Precondition {
                key,
                reason: format!("checkpoint is not freshly constructed (state {})", checkpoint.state),
            });
        }
        require_active_trial(self.trials, &key)?;

        self.db.immediate_transaction(|tx| {
            if checkpoint_exists(tx, checkpoint.trial_id, checkpoint.total_batch)? {
                warn!(entity = %key, "Rejected duplicate checkpoint");
                return Err(LedgerError::Duplicate { key });
            }

            let resources = optional_json_value(checkpoint.resources.as_ref())?;
            let metadata = optional_json_value(Some(&checkpoint.metadata))?;
            let id = insert_returning_id(
                tx,
                "INSERT INTO checkpoints (trial_id, total_batch, state, start_time, end_time, uuid, resources, metadata, framework, format, version) \
                 VALUES (:trial_id, :total_batch, :state, :start_time, :end_time, :uuid, :resources, :metadata, :framework, :format, :version)",
                named_params! {
                    ":trial_id": checkpoint.trial_id,
                    ":total_batch": checkpoint.total_batch,
                    ":state": checkpoint.state.as_str(),
                    ":start_time": timestamp_value(&checkpoint.start_time),
                    ":end_time": optional_timestamp_value(checkpoint.end_time.as_ref()),
                    ":uuid": uuid_value(checkpoint.uuid.as_ref()),
                    ":resources": resources,
                    ":metadata": metadata,
                    ":framework": optional_text_value(checkpoint.framework.as_deref()),
                    ":format": optional_text_value(checkpoint.format.as_deref()),
                    ":version": checkpoint.version,
                },
            )
            .map_err(|e| LedgerError::from_insert(key, e))?;

            info!(
                trial_id = checkpoint.trial_id,
                total_batch = checkpoint.total_batch,
                checkpoint_id = id,
                "Added checkpoint"
            );
            Ok(id)
        })
    }

    fn checkpoint_by_total_batch(
        &self,
        trial_id: i64,
        total_batch: i64,
    ) -> LedgerResult<Checkpoint> {
        load_checkpoint(self.db.conn(), trial_id, total_batch).map_err(|e| {
            LedgerError::from_keyed_lookup(EntityKey::checkpoint(trial_id, total_batch), e)
        })
    }

    fn checkpoint_by_uuid(&self, uuid: Uuid) -> LedgerResult<Checkpoint> {
        query_one(
            self.db.conn(),
            &format!("{SELECT_CHECKPOINT} WHERE uuid = :uuid"),
            named_params! { ":uuid": uuid.to_string() },
            || format!("checkpoint {uuid}"),
            map_checkpoint,
        )
        .map_err(LedgerError::from_lookup)
    }

    fn latest_checkpoint_for_trial(&self, trial_id: i64) -> LedgerResult<Checkpoint> {
        query_one(
            self.db.conn(),
            &format!(
                "{SELECT_CHECKPOINT} WHERE trial_id = :trial_id AND state = :completed \
                 ORDER BY total_batch DESC LIMIT 1"
            ),
            named_params! { ":trial_id": trial_id, ":completed": RunState::Completed.as_str() },
            || format!("completed checkpoint for trial {trial_id}"),
            map_checkpoint,
        )
        .map_err(LedgerError::from_lookup)
    }

    fn checkpoints_for_trial(&self, trial_id: i64) -> LedgerResult<Vec<Checkpoint>> {
        query_all(
            self.db.conn(),
            &format!("{SELECT_CHECKPOINT} WHERE trial_id = :trial_id ORDER BY total_batch"),
            named_params! { ":trial_id": trial_id },
            map_checkpoint,
        )
        .map_err(LedgerError::from)
    }

    fn update_checkpoint(
        &self,
        trial_id: i64,
        total_batch: i64,
        patch: CheckpointPatch,
    ) -> LedgerResult<()> {
        let patch = patch.normalized();
        if patch.is_empty() {
            debug!(trial_id, total_batch, "Nothing to update for checkpoint");
            return Ok(());
        }
        let key = EntityKey::checkpoint(trial_id, total_batch);

        self.db.immediate_transaction(|tx| {
            let mut checkpoint =
                load_checkpoint(tx, trial_id, total_batch)
                    .map_err(|e| LedgerError::from_keyed_lookup(key, e))?;
            let mut update = PartialUpdate::new(CHECKPOINTS_TABLE);

            if let Some(to) = patch.state {
                apply_transition(
                    &key,
                    &mut checkpoint.state,
                    checkpoint.start_time,
                    &mut checkpoint.end_time,
                    to,
                    &mut update,
                )?;
            }
            if let Some(uuid) = patch.uuid {
                assign_once(&key, "uuid", &mut checkpoint.uuid, uuid, &mut update)?;
            }
            if let Some(resources) = patch.resources {
                assign_once(&key, "resources", &mut checkpoint.resources, resources, &mut update)?;
            }
            if let Some(metadata) = patch.metadata {
                merge_keys(&mut checkpoint.metadata, metadata);
                update.touch("metadata");
            }
            if let Some(framework) = patch.framework {
                assign_once(&key, "framework", &mut checkpoint.framework, framework, &mut update)?;
            }
            if let Some(format) = patch.format {
                assign_once(&key, "format", &mut checkpoint.format, format, &mut update)?;
            }

            Self::write(&update, tx, &checkpoint, key, CHECKPOINT_KEY_COLUMNS)?;
            debug!(trial_id, total_batch, columns = ?update.touched(), "Updated checkpoint");
            Ok(())
        })
    }

    fn update_checkpoint_metadata(&self, checkpoint: &Checkpoint) -> LedgerResult<()> {
        let key = checkpoint.key();
        let Some(id) = checkpoint.id else {
            return Err(LedgerError::Precondition {
                key,
                reason: "checkpoint has no id".to_string(),
            });
        };

        let mut update = PartialUpdate::new(CHECKPOINTS_TABLE);
        update.touch("metadata");
        Self::write(&update, self.db.conn(), checkpoint, key, &["id"]).map_err(|e| match e {
            LedgerError::UpdateConflict { rows: 0, .. } => {
                LedgerError::NotFound { what: format!("checkpoint {id}"), key: Some(key) }
            }
            other => other,
        })?;
        info!(checkpoint_id = id, keys = checkpoint.metadata.len(), "Replaced checkpoint metadata");
        Ok(())
    }
}
