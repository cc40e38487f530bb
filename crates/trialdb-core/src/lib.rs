//! trialdb Core - Durable progress ledger for training trials.
//!
//! This crate records the steps, validations and checkpoints a training trial
//! reports, and enforces the rules that keep that record trustworthy:
//! - Work is only created while its trial is active
//! - State changes follow a per-kind transition policy; terminal entry stamps an end time
//! - Write-once fields are never overwritten, mergeable metadata is never erased
//! - Every guarded update touches only changed columns and exactly one row
//!
//! # Example
//!
//! ```rust,no_run
//! use trialdb_core::{
//!     Database, RunState, SqliteStepTracker, SqliteTrialRepository, Step, StepTracker, Trial,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("trialdb.sqlite3")?;
//!     let trials = SqliteTrialRepository::new(&db);
//!     trials.create(&Trial::new(1))?;
//!
//!     let steps = SqliteStepTracker::new(&db, &trials);
//!     steps.add_step(&Step::new(1, 1, 100, 0))?;
//!     steps.update_step(1, 1, Some(RunState::Completed), None)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod policy;
pub mod storage;
pub mod tracking;

pub use config::{Config, ConfigError, DatabaseConfig, ValidationConfig};
pub use error::{LedgerError, LedgerResult};
pub use gate::{TrialStateOracle, require_active_trial};
pub use models::{
    Checkpoint, CheckpointPatch, EntityKey, EntityKind, JsonObj, LEDGER_VERSION, RunState, Step,
    Trial, TrialState, Validation,
};
pub use storage::{Database, SqliteTrialRepository, StorageError, StorageResult};
pub use tracking::{
    CheckpointTracker, SqliteCheckpointTracker, SqliteStepTracker, SqliteValidationTracker,
    StepTracker, ValidationTracker,
};
