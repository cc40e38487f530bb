//! Trial precondition gate.
//!
//! Trials are owned by another subsystem. The ledger only asks one question of
//! it before recording new work: what state is this trial in?

use std::collections::HashMap;
use std::hash::BuildHasher;

use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{EntityKey, TrialState};

/// Source of truth for trial states.
pub trait TrialStateOracle {
    /// Returns the trial's current state, or `LedgerError::NotFound`.
    fn trial_state(&self, trial_id: i64) -> LedgerResult<TrialState>;
}

impl<S: BuildHasher> TrialStateOracle for HashMap<i64, TrialState, S> {
    fn trial_state(&self, trial_id: i64) -> LedgerResult<TrialState> {
        self.get(&trial_id).copied().ok_or_else(|| LedgerError::NotFound {
            what: format!("trial {trial_id}"),
            key: None,
        })
    }
}

/// Rejects creation of `key` unless its trial is active.
///
/// A missing trial is reported as a failed precondition of the creation, not as
/// a lookup miss, since the caller asked to add work rather than to find a trial.
pub fn require_active_trial(oracle: &dyn TrialStateOracle, key: &EntityKey) -> LedgerResult<()> {
    let state = match oracle.trial_state(key.trial_id) {
        Ok(state) => state,
        Err(LedgerError::NotFound { .. }) => {
            warn!(trial_id = key.trial_id, entity = %key, "Rejected work for unknown trial");
            return Err(LedgerError::Precondition {
                key: *key,
                reason: format!("trial {} does not exist", key.trial_id),
            });
        }
        Err(e) => return Err(e),
    };
    if !state.accepts_work() {
        warn!(trial_id = key.trial_id, entity = %key, %state, "Rejected work for inactive trial");
        return Err(LedgerError::Precondition {
            key: *key,
            reason: format!("trial {} is {}", key.trial_id, state),
        });
    }
    Ok(())
}
