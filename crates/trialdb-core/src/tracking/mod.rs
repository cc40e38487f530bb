//! Lifecycle trackers for steps, validations and checkpoints.
//!
//! Every tracker follows the same guarded-update pattern:
//!
//! 1. Short-circuit when the request carries nothing to change.
//! 2. Open an `IMMEDIATE` transaction and re-read the current row.
//! 3. Apply each requested change to the in-memory copy, consulting the
//!    transition policy for state and refusing to overwrite write-once fields.
//! 4. Write back only the touched columns, guarded on what was observed, and
//!    require exactly one row to match.
//!
//! The helpers below implement step 3 so the rules live in one place.

pub mod checkpoints;
pub mod steps;
pub mod validations;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{EntityKey, JsonObj, RunState};
use crate::policy;
use crate::storage::PartialUpdate;

pub use checkpoints::{CheckpointTracker, SqliteCheckpointTracker};
pub use steps::{SqliteStepTracker, StepTracker};
pub use validations::{SqliteValidationTracker, ValidationTracker};

/// Timestamp recorded when an entity enters a terminal state.
///
/// Never earlier than `start_time`, even if the reporting worker's clock ran
/// ahead of ours.
pub(crate) fn terminal_timestamp(start_time: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(start_time)
}

/// Moves `state` to `to` if the policy allows it, stamping `end_time` on entry
/// into a terminal state.
pub(crate) fn apply_transition(
    key: &EntityKey,
    state: &mut RunState,
    start_time: DateTime<Utc>,
    end_time: &mut Option<DateTime<Utc>>,
    to: RunState,
    update: &mut PartialUpdate,
) -> LedgerResult<()> {
    let from = *state;
    if !policy::is_legal(key.kind, from, to) {
        warn!(entity = %key, %from, %to, "Rejected illegal transition");
        return Err(LedgerError::IllegalTransition { key: *key, from, to });
    }

    update.guard_equals("state", from.as_str().to_string()).touch("state");
    *state = to;

    if policy::is_terminal(key.kind, to) {
        update.touch("end_time");
        *end_time = Some(terminal_timestamp(start_time));
        info!(entity = %key, %from, %to, "Entering terminal state");
    }
    Ok(())
}

/// Fills a write-once `slot` with `value`, failing if it is already set.
pub(crate) fn assign_once<T>(
    key: &EntityKey,
    field: &'static str,
    slot: &mut Option<T>,
    value: T,
    update: &mut PartialUpdate,
) -> LedgerResult<()> {
    if slot.is_some() {
        warn!(entity = %key, field, "Rejected second assignment of write-once field");
        return Err(LedgerError::AlreadySet { key: *key, field });
    }
    update.guard_null(field).touch(field);
    *slot = Some(value);
    Ok(())
}

/// Unions `incoming` into `target`; incoming keys overwrite existing ones.
pub(crate) fn merge_keys(target: &mut JsonObj, incoming: JsonObj) {
    for (k, v) in incoming {
        target.insert(k, v);
    }
}

/// Normalizes an optional metrics payload: an empty object means "none".
pub(crate) fn non_empty(obj: Option<JsonObj>) -> Option<JsonObj> {
    obj.filter(|o| !o.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_transition_to_terminal_stamps_end_time() {
        let key = EntityKey::step(1, 1);
        let start = Utc::now();
        let mut state = RunState::Active;
        let mut end_time = None;
        let mut update = PartialUpdate::new("steps");

        apply_transition(&key, &mut state, start, &mut end_time, RunState::Completed, &mut update)
            .unwrap();

        assert_eq!(state, RunState::Completed);
        assert!(end_time.unwrap() >= start);
        assert_eq!(update.touched(), &["state", "end_time"]);
    }

    #[test]
    fn test_apply_transition_rejects_illegal_move_without_touching() {
        let key = EntityKey::checkpoint(1, 10);
        let mut state = RunState::Error;
        let mut end_time = None;
        let mut update = PartialUpdate::new("checkpoints");

        let err = apply_transition(
            &key,
            &mut state,
            Utc::now(),
            &mut end_time,
            RunState::Completed,
            &mut update,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::IllegalTransition { from: RunState::Error, to: RunState::Completed, .. }
        ));
        assert_eq!(state, RunState::Error);
        assert!(update.is_empty());
    }

    #[test]
    fn test_terminal_timestamp_never_precedes_start() {
        let future_start = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(terminal_timestamp(future_start), future_start);
    }

    #[test]
    fn test_assign_once_rejects_second_value() {
        let key = EntityKey::checkpoint(1, 10);
        let mut slot = Some("pytorch".to_string());
        let mut update = PartialUpdate::new("checkpoints");
        let err =
            assign_once(&key, "framework", &mut slot, "tensorflow".to_string(), &mut update)
                .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySet { field: "framework", .. }));
        assert_eq!(slot.as_deref(), Some("pytorch"));
    }

    #[test]
    fn test_merge_keys_overwrites_only_incoming() {
        let mut target = json!({"a": 1, "b": 1}).as_object().cloned().unwrap();
        let incoming = json!({"b": 2, "c": 3}).as_object().cloned().unwrap();
        merge_keys(&mut target, incoming);
        assert_eq!(serde_json::Value::Object(target), json!({"a": 1, "b": 2, "c": 3}));
    }
}
