//! Lifecycle states for trials and the work they record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a step, validation or checkpoint.
///
/// Which moves between these are legal is decided by [`crate::policy`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Work has been reported as started.
    #[default]
    Active,
    /// Work finished successfully.
    Completed,
    /// Work failed.
    Error,
}

impl RunState {
    /// All run states, in declaration order.
    pub const ALL: [RunState; 3] = [RunState::Active, RunState::Completed, RunState::Error];

    /// Returns the stored (upper-case) form of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Active => "ACTIVE",
            RunState::Completed => "COMPLETED",
            RunState::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(RunState::Active),
            "COMPLETED" => Ok(RunState::Completed),
            "ERROR" => Ok(RunState::Error),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// Lifecycle state of a trial.
///
/// Trials are owned elsewhere; the ledger only cares whether one is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialState {
    #[default]
    Active,
    Paused,
    StoppingCanceled,
    StoppingCompleted,
    StoppingError,
    Canceled,
    Completed,
    Error,
}

impl TrialState {
    /// Returns the stored (upper-case) form of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            TrialState::Active => "ACTIVE",
            TrialState::Paused => "PAUSED",
            TrialState::StoppingCanceled => "STOPPING_CANCELED",
            TrialState::StoppingCompleted => "STOPPING_COMPLETED",
            TrialState::StoppingError => "STOPPING_ERROR",
            TrialState::Canceled => "CANCELED",
            TrialState::Completed => "COMPLETED",
            TrialState::Error => "ERROR",
        }
    }

    /// Returns true if new work may be recorded against the trial.
    pub fn accepts_work(self) -> bool {
        self == TrialState::Active
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ACTIVE" => Ok(TrialState::Active),
            "PAUSED" => Ok(TrialState::Paused),
            "STOPPING_CANCELED" => Ok(TrialState::StoppingCanceled),
            "STOPPING_COMPLETED" => Ok(TrialState::StoppingCompleted),
            "STOPPING_ERROR" => Ok(TrialState::StoppingError),
            "CANCELED" => Ok(TrialState::Canceled),
            "COMPLETED" => Ok(TrialState::Completed),
            "ERROR" => Ok(TrialState::Error),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// A state string that does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_round_trips_through_str() {
        for state in RunState::ALL {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
    }

    #[test]
    fn test_run_state_parse_is_case_insensitive() {
        assert_eq!("completed".parse::<RunState>().unwrap(), RunState::Completed);
        assert_eq!(" Error ".parse::<RunState>().unwrap(), RunState::Error);
        assert!("DELETED".parse::<RunState>().is_err());
    }

    #[test]
    fn test_run_state_serde_uses_stored_form() {
        let json = serde_json::to_string(&RunState::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }

    #[test]
    fn test_trial_state_parse_accepts_dashes() {
        assert_eq!(
            "stopping-canceled".parse::<TrialState>().unwrap(),
            TrialState::StoppingCanceled
        );
    }

    #[test]
    fn test_only_active_trials_accept_work() {
        assert!(TrialState::Active.accepts_work());
        assert!(!TrialState::Paused.accepts_work());
        assert!(!TrialState::StoppingCompleted.accepts_work());
        assert!(!TrialState::Completed.accepts_work());
    }
}
