//! Validation data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntityKey, JsonObj, RunState};

/// A recorded evaluation pass, keyed by `(trial_id, total_batch)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    /// Store-generated identifier; `None` until the validation is added.
    pub id: Option<i64>,
    pub trial_id: i64,
    /// Batches the trial had processed when the validation was taken.
    pub total_batch: i64,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Validation metrics; write-once.
    pub metrics: Option<JsonObj>,
}

impl Validation {
    /// Creates a freshly constructed, active validation starting now.
    pub fn new(trial_id: i64, total_batch: i64) -> Self {
        Self {
            id: None,
            trial_id,
            total_batch,
            state: RunState::Active,
            start_time: Utc::now(),
            end_time: None,
            metrics: None,
        }
    }

    /// Returns true if the validation has never been persisted or progressed.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
            && self.state == RunState::Active
            && self.end_time.is_none()
            && self.metrics.is_none()
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::validation(self.trial_id, self.total_batch)
    }
}
