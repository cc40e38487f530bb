//! Error types for ledger operations.

use thiserror::Error;

use crate::models::{EntityKey, RunState};
use crate::storage::StorageError;

/// Errors returned by the step, validation and checkpoint trackers.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The entity is not freshly constructed, or its trial/step is not in the
    /// state creation requires.
    #[error("Precondition failed for {key}: {reason}")]
    Precondition { key: EntityKey, reason: String },

    /// A row already exists for the natural key.
    #[error("Duplicate {key}")]
    Duplicate { key: EntityKey },

    /// A lookup found no matching row. `key` is set when the lookup was by
    /// natural key.
    #[error("Not found: {what}")]
    NotFound { what: String, key: Option<EntityKey> },

    /// The transition policy forbids the requested state change.
    #[error("Illegal transition {from} -> {to} for {key}")]
    IllegalTransition { key: EntityKey, from: RunState, to: RunState },

    /// A write-once field already has a value.
    #[error("{key} already has {field}")]
    AlreadySet { key: EntityKey, field: &'static str },

    /// A guarded write matched a number of rows other than one; another writer
    /// changed the row between read and write, or the store is inconsistent.
    #[error("Update conflict on {key}: {rows} row(s) matched")]
    UpdateConflict { key: EntityKey, rows: usize },

    /// Storage-related errors.
    #[error("Storage error: {0}")]
    Store(#[from] StorageError),
}

impl LedgerError {
    /// Translates a failed insert: constraint violations become `Duplicate`.
    pub(crate) fn from_insert(key: EntityKey, err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation(_) => LedgerError::Duplicate { key },
            other => LedgerError::Store(other),
        }
    }

    /// Translates a failed guarded write: row-count mismatches become
    /// `UpdateConflict`, and a value another row already holds (checkpoint
    /// UUIDs) becomes `Duplicate`.
    pub(crate) fn from_update(key: EntityKey, err: StorageError) -> Self {
        match err {
            StorageError::RowCount { actual, .. } => LedgerError::UpdateConflict { key, rows: actual },
            StorageError::UniqueViolation(_) => LedgerError::Duplicate { key },
            other => LedgerError::Store(other),
        }
    }

    /// Translates a failed lookup: absent rows become `NotFound`.
    pub(crate) fn from_lookup(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => LedgerError::NotFound { what, key: None },
            other => LedgerError::Store(other),
        }
    }

    /// Like [`LedgerError::from_lookup`], for lookups by natural key.
    pub(crate) fn from_keyed_lookup(key: EntityKey, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => LedgerError::NotFound { what, key: Some(key) },
            other => LedgerError::Store(other),
        }
    }

    /// Natural key of the entity the error concerns, if there is one.
    pub fn key(&self) -> Option<EntityKey> {
        match self {
            LedgerError::Precondition { key, .. }
            | LedgerError::Duplicate { key }
            | LedgerError::IllegalTransition { key, .. }
            | LedgerError::AlreadySet { key, .. }
            | LedgerError::UpdateConflict { key, .. } => Some(*key),
            LedgerError::NotFound { key, .. } => *key,
            LedgerError::Store(_) => None,
        }
    }

    /// Returns true if the caller may safely retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(err) if err.is_transient())
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_becomes_duplicate() {
        let key = EntityKey::checkpoint(5, 100);
        let err =
            LedgerError::from_insert(key, StorageError::UniqueViolation("checkpoints".into()));
        assert!(matches!(err, LedgerError::Duplicate { key: k } if k == key));
    }

    #[test]
    fn test_row_count_becomes_update_conflict() {
        let key = EntityKey::step(5, 1);
        let err = LedgerError::from_update(key, StorageError::RowCount { expected: 1, actual: 0 });
        assert!(matches!(err, LedgerError::UpdateConflict { rows: 0, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_lookup() {
        let err = LedgerError::from_lookup(StorageError::NotFound("step (trial 1, step 2)".into()));
        assert_eq!(err.to_string(), "Not found: step (trial 1, step 2)");
        assert_eq!(err.key(), None);
    }

    #[test]
    fn test_keyed_lookup_carries_key() {
        let key = EntityKey::validation(1, 200);
        let err = LedgerError::from_keyed_lookup(key, StorageError::NotFound(key.to_string()));
        assert!(matches!(err, LedgerError::NotFound { key: Some(k), .. } if k == key));
        assert_eq!(err.key(), Some(key));
    }

    #[test]
    fn test_illegal_transition_message_names_key_and_states() {
        let err = LedgerError::IllegalTransition {
            key: EntityKey::step(5, 1),
            from: RunState::Completed,
            to: RunState::Active,
        };
        assert_eq!(err.to_string(), "Illegal transition COMPLETED -> ACTIVE for step (trial 5, step 1)");
    }

    #[test]
    fn test_already_set_message() {
        let err = LedgerError::AlreadySet { key: EntityKey::step(5, 1), field: "metrics" };
        assert_eq!(err.to_string(), "step (trial 5, step 1) already has metrics");
    }

    #[test]
    fn test_only_transient_store_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted");
        assert!(LedgerError::Store(StorageError::Io(io)).is_retryable());
        assert!(!LedgerError::NotFound { what: "x".into(), key: None }.is_retryable());
        assert!(!LedgerError::Duplicate { key: EntityKey::step(1, 1) }.is_retryable());
    }
}
