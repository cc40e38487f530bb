//! Step data structures.
//!
//! A step is one unit of gradient computation reported by a worker. Steps are
//! addressed by `(trial_id, id)` where `id` is the step's ordinal within the trial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntityKey, JsonObj, RunState};

/// A recorded unit of training computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Owning trial.
    pub trial_id: i64,
    /// Ordinal of the step within its trial.
    pub id: i64,
    /// Current lifecycle state.
    pub state: RunState,
    /// When the step was reported as started.
    pub start_time: DateTime<Utc>,
    /// Set once, when the step first enters a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    /// Training metrics; write-once.
    pub metrics: Option<JsonObj>,
    /// Batches trained in this step.
    pub num_batches: i64,
    /// Batches the trial had processed before this step started.
    pub prior_batches_processed: i64,
}

impl Step {
    /// Creates a freshly constructed, active step starting now.
    pub fn new(trial_id: i64, id: i64, num_batches: i64, prior_batches_processed: i64) -> Self {
        Self {
            trial_id,
            id,
            state: RunState::Active,
            start_time: Utc::now(),
            end_time: None,
            metrics: None,
            num_batches,
            prior_batches_processed,
        }
    }

    /// Creates a step that is already completed and trains nothing.
    ///
    /// Used for trials that validate before any training happens, so that the
    /// validation has a completed step to hang off.
    pub fn no_op(trial_id: i64, id: i64, prior_batches_processed: i64) -> Self {
        let now = Utc::now();
        Self {
            trial_id,
            id,
            state: RunState::Completed,
            start_time: now,
            end_time: Some(now),
            metrics: None,
            num_batches: 0,
            prior_batches_processed,
        }
    }

    /// Returns true if the step has never been persisted or progressed.
    pub fn is_new(&self) -> bool {
        self.state == RunState::Active && self.end_time.is_none() && self.metrics.is_none()
    }

    /// Total batches processed by the trial once this step finishes, or `None`
    /// if the sum does not fit in an `i64`.
    pub fn total_batches_processed(&self) -> Option<i64> {
        self.prior_batches_processed.checked_add(self.num_batches)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::step(self.trial_id, self.id)
    }
}
