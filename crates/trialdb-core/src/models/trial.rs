use serde::{Deserialize, Serialize};

use crate::models::TrialState;

/// A training run whose progress the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub id: i64,
    pub state: TrialState,
}

impl Trial {
    /// Creates an active trial.
    pub fn new(id: i64) -> Self {
        Self { id, state: TrialState::Active }
    }

    pub fn with_state(mut self, state: TrialState) -> Self {
        self.state = state;
        self
    }
}
