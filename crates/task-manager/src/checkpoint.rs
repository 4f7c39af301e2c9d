//! Append-only checkpoint store for mid-execution task progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A named snapshot of a task's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint identifier
    pub id: Uuid,

    /// Task the checkpoint belongs to
    pub task_id: Uuid,

    /// Producer-chosen checkpoint name
    pub name: String,

    /// Snapshot payload
    pub data: Value,

    /// Agent that wrote the checkpoint, when known
    pub agent_id: Option<String>,

    /// When the checkpoint was written
    pub created_at: DateTime<Utc>,
}

/// Append-only store of checkpoints, keyed by task
///
/// Appends for one task go through the store lock, so retrieval order
/// (newest first) always reflects submission order even when two
/// checkpoints share a timestamp.
pub struct CheckpointStore {
    by_task: RwLock<HashMap<Uuid, Vec<Checkpoint>>>,
}

impl CheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            by_task: RwLock::new(HashMap::new()),
        }
    }

    /// Append a checkpoint for a task
    pub fn create_checkpoint(
        &self,
        task_id: Uuid,
        name: impl Into<String>,
        data: Value,
        agent_id: Option<String>,
    ) -> Checkpoint {
        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            task_id,
            name: name.into(),
            data,
            agent_id,
            created_at: Utc::now(),
        };

        debug!("Checkpoint '{}' recorded for task {}", checkpoint.name, task_id);
        self.by_task
            .write()
            .unwrap()
            .entry(task_id)
            .or_default()
            .push(checkpoint.clone());
        checkpoint
    }

    /// All checkpoints for a task, newest first
    pub fn get_checkpoints(&self, task_id: Uuid) -> Vec<Checkpoint> {
        self.by_task
            .read()
            .unwrap()
            .get(&task_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent checkpoint for a task
    pub fn get_latest_checkpoint(&self, task_id: Uuid) -> Result<Checkpoint> {
        self.by_task
            .read()
            .unwrap()
            .get(&task_id)
            .and_then(|list| list.last())
            .cloned()
            .ok_or(Error::CheckpointNotFound(task_id))
    }

    /// Remove a single checkpoint by id
    pub fn delete_checkpoint(&self, task_id: Uuid, checkpoint_id: Uuid) -> Result<()> {
        let mut by_task = self.by_task.write().unwrap();
        let list = by_task
            .get_mut(&task_id)
            .ok_or(Error::CheckpointNotFound(task_id))?;

        let before = list.len();
        list.retain(|c| c.id != checkpoint_id);
        if list.len() == before {
            return Err(Error::CheckpointNotFound(task_id));
        }
        Ok(())
    }

    /// Remove every checkpoint for a task
    pub fn delete_all_checkpoints(&self, task_id: Uuid) -> usize {
        self.by_task
            .write()
            .unwrap()
            .remove(&task_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_and_retrieve_newest_first() {
        let store = CheckpointStore::new();
        let task_id = Uuid::new_v4();

        store.create_checkpoint(task_id, "parse", json!({"step": 1}), None);
        store.create_checkpoint(task_id, "compile", json!({"step": 2}), None);
        store.create_checkpoint(task_id, "link", json!({"step": 3}), None);

        let checkpoints = store.get_checkpoints(task_id);
        assert_eq!(checkpoints.len(), 3);
        assert_eq!(checkpoints[0].name, "link");
        assert_eq!(checkpoints[1].name, "compile");
        assert_eq!(checkpoints[2].name, "parse");

        let latest = store.get_latest_checkpoint(task_id).unwrap();
        assert_eq!(latest.name, "link");
        assert_eq!(latest.data["step"], 3);
    }

    #[test]
    fn test_latest_on_empty_store() {
        let store = CheckpointStore::new();
        assert!(matches!(
            store.get_latest_checkpoint(Uuid::new_v4()),
            Err(Error::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn test_delete_single_checkpoint() {
        let store = CheckpointStore::new();
        let task_id = Uuid::new_v4();
        let first = store.create_checkpoint(task_id, "a", json!(null), None);
        store.create_checkpoint(task_id, "b", json!(null), None);

        store.delete_checkpoint(task_id, first.id).unwrap();
        let remaining = store.get_checkpoints(task_id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "b");

        // Deleting again is an error
        assert!(store.delete_checkpoint(task_id, first.id).is_err());
    }

    #[test]
    fn test_delete_all() {
        let store = CheckpointStore::new();
        let task_id = Uuid::new_v4();
        store.create_checkpoint(task_id, "a", json!(null), Some("agent-1".to_string()));
        store.create_checkpoint(task_id, "b", json!(null), Some("agent-1".to_string()));

        assert_eq!(store.delete_all_checkpoints(task_id), 2);
        assert!(store.get_checkpoints(task_id).is_empty());
        assert_eq!(store.delete_all_checkpoints(task_id), 0);
    }

    #[test]
    fn test_tasks_are_isolated() {
        let store = CheckpointStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.create_checkpoint(a, "only-a", json!(null), None);

        assert_eq!(store.get_checkpoints(a).len(), 1);
        assert!(store.get_checkpoints(b).is_empty());
    }

    #[test]
    fn test_submission_order_with_equal_timestamps() {
        let store = CheckpointStore::new();
        let task_id = Uuid::new_v4();

        // Rapid appends can land on the same millisecond; order must hold
        for i in 0..20 {
            store.create_checkpoint(task_id, format!("step-{}", i), json!(i), None);
        }

        let names: Vec<String> = store
            .get_checkpoints(task_id)
            .into_iter()
            .map(|c| c.name)
            .collect();
        let expected: Vec<String> = (0..20).rev().map(|i| format!("step-{}", i)).collect();
        assert_eq!(names, expected);
    }
}
