//! Data models for the training ledger.
//!
//! This module defines trials and the three kinds of work they record
//! (steps, validations, checkpoints), their lifecycle states, and the natural
//! keys used to address them.

pub mod checkpoint;
pub mod key;
pub mod state;
pub mod step;
pub mod trial;
pub mod validation;

/// Opaque JSON object payload (metrics, resources, metadata).
pub type JsonObj = serde_json::Map<String, serde_json::Value>;

pub use checkpoint::{Checkpoint, CheckpointPatch, LEDGER_VERSION};
pub use key::{EntityKey, EntityKind};
pub use state::{ParseStateError, RunState, TrialState};
pub use step::Step;
pub use trial::Trial;
pub use validation::Validation;
