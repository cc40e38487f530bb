//! Storage layer for the training ledger.
//!
//! This module provides SQLite persistence: connection and schema handling,
//! the store primitives (insert-returning-id, single-row query,
//! execute-exactly-N-rows), the partial-update builder shared by the trackers,
//! and the trial registry behind the default trial gate.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod partial_update;
pub mod rows;
pub mod trials;

pub use database::{
    Database, NamedParams, execute_exactly, insert_returning_id, query_all, query_one,
};
pub use error::{StorageError, StorageResult};
pub use partial_update::{Guard, PartialUpdate, UpdateColumns};
pub use trials::SqliteTrialRepository;
