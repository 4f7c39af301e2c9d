//! Dependency validation, gating and cycle detection
//!
//! Edges are stored as id-to-id only, inside the task records themselves;
//! the manager shares its task store with this component by `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::task::{Task, TaskStatus};

/// Validates dependency lists and answers graph queries over the task store
pub struct DependencyManager {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl DependencyManager {
    /// Create a manager over a shared task store
    pub fn new(tasks: Arc<RwLock<HashMap<Uuid, Task>>>) -> Self {
        Self { tasks }
    }

    /// Every id must reference an existing task
    ///
    /// An empty list is trivially valid.
    pub fn validate_dependencies(&self, ids: &[Uuid]) -> Result<()> {
        let tasks = self.tasks.read().unwrap();
        for id in ids {
            if !tasks.contains_key(id) {
                return Err(Error::DependencyNotFound(*id));
            }
        }
        Ok(())
    }

    /// Whether every referenced task has completed
    ///
    /// An empty list counts as completed. A missing task is an error:
    /// validation should have caught it at creation time.
    pub fn check_dependencies_completed(&self, ids: &[Uuid]) -> Result<bool> {
        let tasks = self.tasks.read().unwrap();
        for id in ids {
            let task = tasks.get(id).ok_or(Error::DependencyNotFound(*id))?;
            if task.status != TaskStatus::Completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The subset of ids whose tasks have not completed
    ///
    /// Ids referencing missing tasks are included: whatever happened to
    /// them, they are certainly not completed.
    pub fn get_blocking_dependencies(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let tasks = self.tasks.read().unwrap();
        ids.iter()
            .filter(|id| {
                tasks
                    .get(id)
                    .map(|t| t.status != TaskStatus::Completed)
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// Whether adding `proposed` as dependencies of `task_id` closes a cycle
    ///
    /// True iff any path from a proposed dependency reaches `task_id`
    /// through the stored dependency edges.
    pub fn detect_circular_dependencies(&self, task_id: Uuid, proposed: &[Uuid]) -> bool {
        if proposed.is_empty() {
            return false;
        }
        if proposed.contains(&task_id) {
            return true;
        }

        let tasks = self.tasks.read().unwrap();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<Uuid> = proposed.to_vec();

        while let Some(current) = stack.pop() {
            if current == task_id {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(task) = tasks.get(&current) {
                stack.extend(task.dependencies.iter().copied());
            }
        }
        false
    }

    /// Transitive closure of ancestors, including `task_id` itself
    pub fn get_dependency_chain(&self, task_id: Uuid) -> Vec<Uuid> {
        let tasks = self.tasks.read().unwrap();
        let mut chain: Vec<Uuid> = Vec::new();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<Uuid> = vec![task_id];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            chain.push(current);
            if let Some(task) = tasks.get(&current) {
                stack.extend(task.dependencies.iter().copied());
            }
        }
        chain
    }

    /// Tasks that list `task_id` as a direct dependency
    pub fn get_dependent_tasks(&self, task_id: Uuid) -> Vec<Uuid> {
        let tasks = self.tasks.read().unwrap();
        tasks
            .values()
            .filter(|t| t.dependencies.contains(&task_id))
            .map(|t| t.id)
            .collect()
    }
}
