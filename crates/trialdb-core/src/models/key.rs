//! Natural keys used to address ledger entities in errors and logs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The three kinds of work a trial records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Step,
    Validation,
    Checkpoint,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Step => "step",
            EntityKind::Validation => "validation",
            EntityKind::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a ledger entity.
///
/// Steps are keyed by `(trial_id, step number)`; validations and checkpoints by
/// `(trial_id, total_batch)`. `ordinal` holds the second component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub trial_id: i64,
    pub ordinal: i64,
}

impl EntityKey {
    pub fn step(trial_id: i64, step_id: i64) -> Self {
        Self { kind: EntityKind::Step, trial_id, ordinal: step_id }
    }

    pub fn validation(trial_id: i64, total_batch: i64) -> Self {
        Self { kind: EntityKind::Validation, trial_id, ordinal: total_batch }
    }

    pub fn checkpoint(trial_id: i64, total_batch: i64) -> Self {
        Self { kind: EntityKind::Checkpoint, trial_id, ordinal: total_batch }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntityKind::Step => {
                write!(f, "step (trial {}, step {})", self.trial_id, self.ordinal)
            }
            EntityKind::Validation | EntityKind::Checkpoint => {
                write!(f, "{} (trial {}, total batch {})", self.kind, self.trial_id, self.ordinal)
            }
        }
    }
}
