//! Checkpoint data structures.
//!
//! A checkpoint is a persisted model snapshot. Besides its lifecycle state it
//! carries a set of write-once descriptors (UUID, resources, framework, format)
//! and a mergeable metadata map that may be enriched after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntityKey, JsonObj, RunState};

/// Version tag recorded on every checkpoint at creation.
pub const LEDGER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A recorded, externally addressable snapshot of trial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Store-generated identifier; `None` until the checkpoint is added.
    pub id: Option<i64>,
    pub trial_id: i64,
    pub total_batch: i64,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// External identifier; write-once and globally unique.
    pub uuid: Option<Uuid>,
    /// Manifest of stored files; write-once.
    pub resources: Option<JsonObj>,
    /// Free-form metadata; merged key by key on update.
    pub metadata: JsonObj,
    /// Training framework that produced the snapshot; write-once.
    pub framework: Option<String>,
    /// Serialization format of the snapshot; write-once.
    pub format: Option<String>,
    /// Ledger version that created the row.
    pub version: String,
}

impl Checkpoint {
    /// Creates a freshly constructed, active checkpoint starting now.
    pub fn new(trial_id: i64, total_batch: i64) -> Self {
        Self {
            id: None,
            trial_id,
            total_batch,
            state: RunState::Active,
            start_time: Utc::now(),
            end_time: None,
            uuid: None,
            resources: None,
            metadata: JsonObj::new(),
            framework: None,
            format: None,
            version: LEDGER_VERSION.to_string(),
        }
    }

    /// Returns true if the checkpoint has never been persisted or progressed.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
            && self.state == RunState::Active
            && self.end_time.is_none()
            && self.uuid.is_none()
            && self.resources.is_none()
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::checkpoint(self.trial_id, self.total_batch)
    }
}

/// Requested changes to a stored checkpoint.
///
/// Empty strings and empty maps count as "not supplied", so a worker resending
/// a blank report is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPatch {
    #[serde(default)]
    pub state: Option<RunState>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub resources: Option<JsonObj>,
    #[serde(default)]
    pub metadata: Option<JsonObj>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl CheckpointPatch {
    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_resources(mut self, resources: JsonObj) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonObj) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Drops fields that carry no value (nil UUID, empty maps, blank strings).
    pub fn normalized(self) -> Self {
        Self {
            state: self.state,
            uuid: self.uuid.filter(|u| !u.is_nil()),
            resources: self.resources.filter(|r| !r.is_empty()),
            metadata: self.metadata.filter(|m| !m.is_empty()),
            framework: self.framework.filter(|f| !f.trim().is_empty()),
            format: self.format.filter(|f| !f.trim().is_empty()),
        }
    }

    /// Returns true if the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        let patch = self.clone().normalized();
        patch.state.is_none()
            && patch.uuid.is_none()
            && patch.resources.is_none()
            && patch.metadata.is_none()
            && patch.framework.is_none()
            && patch.format.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> JsonObj {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_checkpoint_new_records_version() {
        let checkpoint = Checkpoint::new(5, 100);
        assert!(checkpoint.is_new());
        assert_eq!(checkpoint.version, LEDGER_VERSION);
        assert!(checkpoint.metadata.is_empty());
    }

    #[test]
    fn test_checkpoint_with_uuid_is_not_fresh() {
        let mut checkpoint = Checkpoint::new(5, 100);
        checkpoint.uuid = Some(Uuid::new_v4());
        assert!(!checkpoint.is_new());
    }

    #[test]
    fn test_default_patch_is_empty() {
        assert!(CheckpointPatch::default().is_empty());
    }

    #[test]
    fn test_blank_fields_count_as_empty() {
        let patch = CheckpointPatch::default()
            .with_uuid(Uuid::nil())
            .with_metadata(JsonObj::new())
            .with_resources(JsonObj::new())
            .with_framework("  ")
            .with_format("");
        assert!(patch.is_empty());
    }

    #[test]
    fn test_patch_with_metadata_is_not_empty() {
        let patch = CheckpointPatch::default().with_metadata(obj(json!({"b": 2})));
        assert!(!patch.is_empty());
        let patch = CheckpointPatch::default().with_state(RunState::Completed);
        assert!(!patch.is_empty());
    }
}
