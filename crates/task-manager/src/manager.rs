//! Task lifecycle management: creation, assignment, retries, splitting
//!
//! The manager is the scheduling nucleus. It owns the task store, feeds
//! the priority queue, gates scheduling on dependencies, applies the
//! retry policy, and optionally writes through an auxiliary cache.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentPool;
use crate::cache::TaskCache;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::deps::DependencyManager;
use crate::error::{Error, Result};
use crate::queue::{QueueStats, TaskQueue};
use crate::task::{Criticality, Task, TaskPriority, TaskProgress, TaskStatus, TaskType};

/// Cache TTL for individual task records
const TASK_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Cache TTL for aggregate task statistics
const STATS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Cache TTL for per-agent task lists
const AGENT_TASKS_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

const STATS_CACHE_KEY: &str = "task:stats";

fn task_cache_key(id: Uuid) -> String {
    format!("task:{}", id)
}

fn agent_tasks_cache_key(agent_id: &str) -> String {
    format!("agent_tasks:{}", agent_id)
}

/// Definition of one subtask produced by a split strategy
#[derive(Debug, Clone)]
pub struct SubtaskSpec {
    /// Kind of work for the subtask
    pub task_type: TaskType,
    /// Subtask payload
    pub data: HashMap<String, Value>,
    /// Subtask priority
    pub priority: TaskPriority,
    /// Subtask criticality
    pub criticality: Criticality,
}

/// Decomposes a parent task into subtask definitions
pub trait SplitStrategy: Send + Sync {
    /// Produce the subtask definitions for a parent task
    fn split(&self, parent: &Task) -> Result<Vec<SubtaskSpec>>;
}

/// The scheduling nucleus
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
    queue: TaskQueue,
    deps: DependencyManager,
    checkpoints: CheckpointStore,
    agents: Arc<AgentPool>,
    cache: Option<Arc<dyn TaskCache>>,
}

impl TaskManager {
    /// Create a manager sharing the given agent pool
    pub fn new(agents: Arc<AgentPool>) -> Self {
        let tasks: Arc<RwLock<HashMap<Uuid, Task>>> = Arc::new(RwLock::new(HashMap::new()));
        Self {
            deps: DependencyManager::new(tasks.clone()),
            tasks,
            queue: TaskQueue::new(),
            checkpoints: CheckpointStore::new(),
            agents,
            cache: None,
        }
    }

    /// Create a manager with an auxiliary cache
    pub fn with_cache(agents: Arc<AgentPool>, cache: Arc<dyn TaskCache>) -> Self {
        let mut manager = Self::new(agents);
        manager.cache = Some(cache);
        manager
    }

    /// The dependency manager over this manager's task store
    pub fn dependencies(&self) -> &DependencyManager {
        &self.deps
    }

    /// The shared agent pool
    pub fn agents(&self) -> &Arc<AgentPool> {
        &self.agents
    }

    /// Current queue depths
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Validate dependencies, create a pending task and enqueue it
    ///
    /// The task is not created when any dependency is unknown.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        data: HashMap<String, Value>,
        priority: TaskPriority,
        criticality: Criticality,
        dependencies: Vec<Uuid>,
    ) -> Result<Task> {
        self.deps.validate_dependencies(&dependencies)?;

        let task = Task::new(task_type, data, priority, criticality, dependencies);
        info!(
            "Created task {} ({:?}, priority {:?})",
            task.id, task.task_type, task.priority
        );

        self.tasks.write().unwrap().insert(task.id, task.clone());
        self.queue.add_task(&task);

        self.cache_task(&task).await;
        self.invalidate_stats().await;
        Ok(task)
    }

    /// Fetch a task by id, as a copy
    ///
    /// Reads go through the cache when one is configured; a miss falls
    /// back to the authoritative store.
    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        if let Some(cache) = &self.cache {
            match cache.get(&task_cache_key(id)).await {
                Ok(Some(value)) => {
                    if let Ok(task) = serde_json::from_value::<Task>(value) {
                        debug!("Task {} served from cache", id);
                        return Ok(task);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Cache read failed for task {}: {}", id, e),
            }
        }

        let task = self
            .tasks
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))?;
        self.cache_task(&task).await;
        Ok(task)
    }

    /// Replace a task's dependency list, rejecting cycles
    pub async fn update_task_dependencies(&self, id: Uuid, dependencies: Vec<Uuid>) -> Result<()> {
        self.deps.validate_dependencies(&dependencies)?;
        if self.deps.detect_circular_dependencies(id, &dependencies) {
            return Err(Error::CircularDependency(id));
        }

        let updated = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            task.dependencies = dependencies;
            task.touch();
            task.clone()
        };

        self.cache_task(&updated).await;
        Ok(())
    }

    /// Assign a task to an agent after capability and capacity checks
    pub async fn assign_task(&self, id: Uuid, agent_id: &str) -> Result<()> {
        let required = {
            let tasks = self.tasks.read().unwrap();
            let task = tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
            if task.status.is_terminal() {
                return Err(Error::TaskTerminal {
                    id,
                    status: task.status,
                });
            }
            task.required_capabilities()
        };

        let agent = self.agents.get(agent_id)?;
        let missing = agent.missing_capabilities(required);
        if !missing.is_empty() {
            return Err(Error::MissingCapabilities {
                agent: agent_id.to_string(),
                missing,
            });
        }

        // Capacity check and accounting are one atomic step in the pool
        self.agents.increment_task_count(agent_id)?;

        let updated = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            task.status = TaskStatus::Assigned;
            task.assigned_agent = Some(agent_id.to_string());
            if task.original_agent.is_none() {
                task.original_agent = Some(agent_id.to_string());
            }
            task.touch();
            task.clone()
        };

        info!("Assigned task {} to agent '{}'", id, agent_id);
        self.cache_task(&updated).await;
        self.invalidate_agent_tasks(agent_id).await;
        self.invalidate_stats().await;
        Ok(())
    }

    /// Move an assigned task into execution
    pub async fn start_task(&self, id: Uuid) -> Result<()> {
        let updated = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            if task.status != TaskStatus::Assigned {
                return Err(Error::InvalidTransition {
                    id,
                    actual: task.status,
                    expected: TaskStatus::Assigned,
                });
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());
            task.touch();
            task.clone()
        };

        self.cache_task(&updated).await;
        self.invalidate_stats().await;
        Ok(())
    }

    /// Record a successful completion
    pub async fn complete_task(&self, id: Uuid, result: Value) -> Result<()> {
        let (updated, agent) = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            if task.status.is_terminal() {
                return Err(Error::TaskTerminal {
                    id,
                    status: task.status,
                });
            }
            task.status = TaskStatus::Completed;
            task.result_data = Some(result);
            task.completed_at = Some(chrono::Utc::now());
            task.touch();
            (task.clone(), task.assigned_agent.clone())
        };

        if let Some(agent_id) = &agent {
            if let Err(e) = self.agents.decrement_task_count(agent_id) {
                warn!("Could not release agent '{}' for task {}: {}", agent_id, id, e);
            }
            self.invalidate_agent_tasks(agent_id).await;
        }

        info!("Task {} completed", id);
        self.cache_task(&updated).await;
        self.invalidate_stats().await;
        Ok(())
    }

    /// Record a failure, retrying until the retry budget is spent
    ///
    /// While `retry_count < max_retries` the task goes back to pending
    /// and re-enters the queue; afterwards it is terminally failed.
    pub async fn fail_task(&self, id: Uuid, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let (updated, agent, requeue) = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
            if task.status.is_terminal() {
                return Err(Error::TaskTerminal {
                    id,
                    status: task.status,
                });
            }

            let agent = task.assigned_agent.clone();
            task.error_message = Some(message.clone());

            let requeue = if task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                task.assigned_agent = None;
                task.started_at = None;
                true
            } else {
                task.status = TaskStatus::Failed;
                false
            };
            task.touch();
            (task.clone(), agent, requeue)
        };

        if let Some(agent_id) = &agent {
            if let Err(e) = self.agents.decrement_task_count(agent_id) {
                warn!("Could not release agent '{}' for task {}: {}", agent_id, id, e);
            }
            self.invalidate_agent_tasks(agent_id).await;
        }

        if requeue {
            info!(
                "Task {} failed ({}), retry {}/{}",
                id, message, updated.retry_count, updated.max_retries
            );
            self.queue.add_task(&updated);
        } else {
            warn!("Task {} permanently failed: {}", id, message);
        }

        self.cache_task(&updated).await;
        self.invalidate_stats().await;
        Ok(())
    }

    /// Split a task into subtasks produced by a strategy
    ///
    /// The parent waits on its children: it moves to
    /// `WaitingForDependencies` with the subtask ids recorded both as
    /// dependencies and under `data["subtasks"]`.
    pub async fn split_task(
        &self,
        parent_id: Uuid,
        strategy: &dyn SplitStrategy,
    ) -> Result<Vec<Task>> {
        let parent = {
            let tasks = self.tasks.read().unwrap();
            let task = tasks.get(&parent_id).ok_or(Error::TaskNotFound(parent_id))?;
            if task.status.is_terminal() {
                return Err(Error::TaskTerminal {
                    id: parent_id,
                    status: task.status,
                });
            }
            task.clone()
        };

        let specs = strategy.split(&parent)?;
        if specs.is_empty() {
            return Err(Error::SplitFailed(format!(
                "strategy produced no subtasks for {}",
                parent_id
            )));
        }

        let mut subtasks = Vec::with_capacity(specs.len());
        for spec in specs {
            let subtask = self
                .create_task(spec.task_type, spec.data, spec.priority, spec.criticality, vec![])
                .await?;
            subtasks.push(subtask);
        }

        let subtask_ids: Vec<Uuid> = subtasks.iter().map(|t| t.id).collect();
        let updated = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&parent_id).ok_or(Error::TaskNotFound(parent_id))?;
            task.status = TaskStatus::WaitingForDependencies;
            task.dependencies.extend(subtask_ids.iter().copied());
            task.data.insert(
                "subtasks".to_string(),
                serde_json::to_value(&subtask_ids)?,
            );
            task.touch();
            task.clone()
        };

        info!("Split task {} into {} subtasks", parent_id, subtasks.len());
        self.cache_task(&updated).await;
        Ok(subtasks)
    }

    /// Record a checkpoint for a task
    pub async fn create_checkpoint(
        &self,
        task_id: Uuid,
        name: impl Into<String>,
        data: Value,
    ) -> Result<Checkpoint> {
        let (agent, updated) = {
            let mut tasks = self.tasks.write().unwrap();
            let task = tasks.get_mut(&task_id).ok_or(Error::TaskNotFound(task_id))?;
            task.checkpoint_data = Some(data.clone());
            task.touch();
            (task.assigned_agent.clone(), task.clone())
        };

        let checkpoint = self
            .checkpoints
            .create_checkpoint(task_id, name, data, agent);
        self.cache_task(&updated).await;
        Ok(checkpoint)
    }

    /// All checkpoints for a task, newest first
    pub fn get_checkpoints(&self, task_id: Uuid) -> Vec<Checkpoint> {
        self.checkpoints.get_checkpoints(task_id)
    }

    /// The most recent checkpoint for a task
    pub fn get_latest_checkpoint(&self, task_id: Uuid) -> Result<Checkpoint> {
        self.checkpoints.get_latest_checkpoint(task_id)
    }

    /// Progress snapshot for observers
    ///
    /// Completed tasks report 100. Running tasks report elapsed time
    /// against the producer's estimate, capped at 95 until completion
    /// actually lands, or 50 when no estimate exists. Everything else
    /// reports 0.
    pub fn get_task_progress(&self, id: Uuid) -> Result<TaskProgress> {
        let tasks = self.tasks.read().unwrap();
        let task = tasks.get(&id).ok_or(Error::TaskNotFound(id))?;

        let progress = match task.status {
            TaskStatus::Completed => 100.0,
            TaskStatus::Running => match task.estimated_duration {
                Some(estimate) if !estimate.is_zero() => {
                    let reference = task.started_at.unwrap_or(task.created_at);
                    let elapsed = chrono::Utc::now()
                        .signed_duration_since(reference)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    (elapsed.as_secs_f64() / estimate.as_secs_f64() * 100.0).min(95.0)
                }
                _ => 50.0,
            },
            _ => 0.0,
        };

        Ok(TaskProgress {
            status: task.status,
            progress,
            started_at: task.started_at,
            updated_at: task.updated_at,
        })
    }

    /// Pop the next queued task whose dependencies are all satisfied
    ///
    /// Blocked tasks go back to the tail of their band; tasks that left
    /// the pending state while queued are dropped silently.
    pub fn next_ready_task(&self) -> Option<Task> {
        let depth = self.queue.stats().total;
        for _ in 0..depth {
            let id = self.queue.next_task()?;

            let task = match self.tasks.read().unwrap().get(&id) {
                Some(task) => task.clone(),
                None => continue,
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            if self.deps.get_blocking_dependencies(&task.dependencies).is_empty() {
                return Some(task);
            }
            debug!("Task {} still blocked, requeueing", id);
            self.queue.add_id(id, task.priority);
        }
        None
    }

    /// Task counts by status
    pub async fn task_stats(&self) -> HashMap<String, usize> {
        if let Some(cache) = &self.cache {
            if let Ok(Some(value)) = cache.get(STATS_CACHE_KEY).await {
                if let Ok(stats) = serde_json::from_value(value) {
                    return stats;
                }
            }
        }

        let stats = {
            let tasks = self.tasks.read().unwrap();
            let mut stats: HashMap<String, usize> = HashMap::new();
            for task in tasks.values() {
                *stats.entry(status_key(task.status).to_string()).or_insert(0) += 1;
            }
            stats.insert("total".to_string(), tasks.len());
            stats
        };

        if let Some(cache) = &self.cache {
            if let Ok(value) = serde_json::to_value(&stats) {
                if let Err(e) = cache.put(STATS_CACHE_KEY, value, STATS_CACHE_TTL).await {
                    debug!("Cache write failed for task stats: {}", e);
                }
            }
        }
        stats
    }

    /// Tasks currently assigned to an agent
    pub async fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let key = agent_tasks_cache_key(agent_id);
        if let Some(cache) = &self.cache {
            if let Ok(Some(value)) = cache.get(&key).await {
                if let Ok(tasks) = serde_json::from_value(value) {
                    return tasks;
                }
            }
        }

        let tasks: Vec<Task> = {
            let store = self.tasks.read().unwrap();
            store
                .values()
                .filter(|t| t.assigned_agent.as_deref() == Some(agent_id))
                .cloned()
                .collect()
        };

        if let Some(cache) = &self.cache {
            if let Ok(value) = serde_json::to_value(&tasks) {
                if let Err(e) = cache.put(&key, value, AGENT_TASKS_CACHE_TTL).await {
                    debug!("Cache write failed for agent task list: {}", e);
                }
            }
        }
        tasks
    }

    /// Write a task through to the cache, swallowing cache failures
    async fn cache_task(&self, task: &Task) {
        if let Some(cache) = &self.cache {
            match serde_json::to_value(task) {
                Ok(value) => {
                    if let Err(e) = cache
                        .put(&task_cache_key(task.id), value, TASK_CACHE_TTL)
                        .await
                    {
                        debug!("Cache write failed for task {}: {}", task.id, e);
                    }
                }
                Err(e) => debug!("Could not encode task {} for cache: {}", task.id, e),
            }
        }
    }

    async fn invalidate_stats(&self) {
        if let Some(cache) = &self.cache {
            let _ = cache.delete(STATS_CACHE_KEY).await;
        }
    }

    async fn invalidate_agent_tasks(&self, agent_id: &str) {
        if let Some(cache) = &self.cache {
            let _ = cache.delete(&agent_tasks_cache_key(agent_id)).await;
        }
    }
}

fn status_key(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Assigned => "assigned",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Paused => "paused",
        TaskStatus::WaitingForWorker => "waiting_for_worker",
        TaskStatus::WaitingForDependencies => "waiting_for_dependencies",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use serde_json::json;

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(AgentPool::new()))
    }

    fn manager_with_agent() -> TaskManager {
        let pool = Arc::new(AgentPool::new());
        pool.register(Agent::new(
            "builder-1",
            "builder",
            ["compilation", "build_tools"],
            2,
        ))
        .unwrap();
        TaskManager::new(pool)
    }

    async fn simple_task(manager: &TaskManager) -> Task {
        manager
            .create_task(
                TaskType::Building,
                HashMap::new(),
                TaskPriority::Normal,
                Criticality::Normal,
                vec![],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_dependency() {
        let manager = manager();
        let ghost = Uuid::new_v4();

        let result = manager
            .create_task(
                TaskType::Testing,
                HashMap::new(),
                TaskPriority::Normal,
                Criticality::Normal,
                vec![ghost],
            )
            .await;

        assert!(matches!(result, Err(Error::DependencyNotFound(_))));
        // Nothing was created or queued
        assert_eq!(manager.queue_stats().total, 0);
    }

    #[tokio::test]
    async fn test_assignment_checks_capabilities() {
        let manager = manager_with_agent();
        let task = manager
            .create_task(
                TaskType::Debugging,
                HashMap::new(),
                TaskPriority::Normal,
                Criticality::Normal,
                vec![],
            )
            .await
            .unwrap();

        // builder-1 has build capabilities, not debugging ones
        let result = manager.assign_task(task.id, "builder-1").await;
        assert!(matches!(result, Err(Error::MissingCapabilities { .. })));

        let build_task = simple_task(&manager).await;
        manager.assign_task(build_task.id, "builder-1").await.unwrap();

        let assigned = manager.get_task(build_task.id).await.unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert_eq!(assigned.assigned_agent.as_deref(), Some("builder-1"));
        assert_eq!(
            manager.agents().get("builder-1").unwrap().current_task_count,
            1
        );
    }

    #[tokio::test]
    async fn test_assignment_respects_capacity() {
        let manager = manager_with_agent();
        let t1 = simple_task(&manager).await;
        let t2 = simple_task(&manager).await;
        let t3 = simple_task(&manager).await;

        manager.assign_task(t1.id, "builder-1").await.unwrap();
        manager.assign_task(t2.id, "builder-1").await.unwrap();
        assert!(matches!(
            manager.assign_task(t3.id, "builder-1").await,
            Err(Error::AgentAtCapacity(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_releases_agent() {
        let manager = manager_with_agent();
        let task = simple_task(&manager).await;

        manager.assign_task(task.id, "builder-1").await.unwrap();
        manager.start_task(task.id).await.unwrap();
        manager
            .complete_task(task.id, json!({"artifacts": 3}))
            .await
            .unwrap();

        let done = manager.get_task(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result_data.unwrap()["artifacts"], 3);
        assert_eq!(
            manager.agents().get("builder-1").unwrap().current_task_count,
            0
        );

        // Terminal tasks refuse further transitions
        assert!(matches!(
            manager.complete_task(task.id, json!(null)).await,
            Err(Error::TaskTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_then_terminal_failure() {
        let manager = manager_with_agent();
        let task = simple_task(&manager).await;
        assert_eq!(task.max_retries, 3);

        // Drain the initial queue entry so re-enqueues are observable
        assert_eq!(manager.next_ready_task().unwrap().id, task.id);

        for attempt in 1..=3u32 {
            manager.assign_task(task.id, "builder-1").await.unwrap();
            manager.fail_task(task.id, "flaky network").await.unwrap();

            let failed = manager.get_task(task.id).await.unwrap();
            assert_eq!(failed.status, TaskStatus::Pending);
            assert_eq!(failed.retry_count, attempt);
            assert!(failed.assigned_agent.is_none());
            // Back in the queue after each retry
            assert_eq!(manager.next_ready_task().unwrap().id, task.id);
        }

        // Fourth failure exhausts the budget
        manager.assign_task(task.id, "builder-1").await.unwrap();
        manager.fail_task(task.id, "still broken").await.unwrap();

        let dead = manager.get_task(task.id).await.unwrap();
        assert_eq!(dead.status, TaskStatus::Failed);
        assert_eq!(dead.retry_count, 3);
        assert_eq!(dead.error_message.as_deref(), Some("still broken"));
        assert!(manager.next_ready_task().is_none());
        assert_eq!(
            manager.agents().get("builder-1").unwrap().current_task_count,
            0
        );

        assert!(matches!(
            manager.complete_task(task.id, json!(null)).await,
            Err(Error::TaskTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let manager = manager();
        let t1 = simple_task(&manager).await;
        let t2 = manager
            .create_task(
                TaskType::Building,
                HashMap::new(),
                TaskPriority::Normal,
                Criticality::Normal,
                vec![t1.id],
            )
            .await
            .unwrap();

        assert_eq!(
            manager.dependencies().get_blocking_dependencies(&[t1.id]),
            vec![t1.id]
        );

        // t1 is ready, t2 is blocked behind it
        assert_eq!(manager.next_ready_task().unwrap().id, t1.id);
        assert!(manager.next_ready_task().is_none());

        manager.complete_task(t1.id, json!(null)).await.unwrap();
        assert!(manager
            .dependencies()
            .check_dependencies_completed(&[t1.id])
            .unwrap());
        assert_eq!(manager.next_ready_task().unwrap().id, t2.id);
    }

    #[tokio::test]
    async fn test_circular_dependency_rejected_on_update() {
        let manager = manager();
        let t1 = simple_task(&manager).await;
        let t2 = simple_task(&manager).await;

        // t1 depends on t2; making t2 depend on t1 would close the loop
        manager
            .update_task_dependencies(t1.id, vec![t2.id])
            .await
            .unwrap();
        assert!(manager
            .dependencies()
            .detect_circular_dependencies(t2.id, &[t1.id]));
        assert!(matches!(
            manager.update_task_dependencies(t2.id, vec![t1.id]).await,
            Err(Error::CircularDependency(_))
        ));

        // The rejected update left t2 untouched
        assert!(manager.get_task(t2.id).await.unwrap().dependencies.is_empty());
    }

    struct HalvesStrategy;

    impl SplitStrategy for HalvesStrategy {
        fn split(&self, parent: &Task) -> Result<Vec<SubtaskSpec>> {
            Ok((0..2)
                .map(|i| SubtaskSpec {
                    task_type: parent.task_type.clone(),
                    data: HashMap::from([("shard".to_string(), json!(i))]),
                    priority: parent.priority,
                    criticality: parent.criticality,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_split_parent_waits_on_children() {
        let manager = manager();
        let parent = simple_task(&manager).await;

        let subtasks = manager.split_task(parent.id, &HalvesStrategy).await.unwrap();
        assert_eq!(subtasks.len(), 2);

        let parent = manager.get_task(parent.id).await.unwrap();
        assert_eq!(parent.status, TaskStatus::WaitingForDependencies);
        assert_eq!(parent.dependencies.len(), 2);
        assert_eq!(parent.data["subtasks"].as_array().unwrap().len(), 2);

        // Children complete -> parent dependencies are satisfied
        for subtask in &subtasks {
            manager.complete_task(subtask.id, json!(null)).await.unwrap();
        }
        assert!(manager
            .dependencies()
            .check_dependencies_completed(&parent.dependencies)
            .unwrap());
    }

    #[tokio::test]
    async fn test_progress_reporting() {
        let manager = manager_with_agent();
        let task = simple_task(&manager).await;

        assert_eq!(manager.get_task_progress(task.id).unwrap().progress, 0.0);

        manager.assign_task(task.id, "builder-1").await.unwrap();
        assert_eq!(manager.get_task_progress(task.id).unwrap().progress, 0.0);

        manager.start_task(task.id).await.unwrap();
        // No estimate: running reports the 50 midpoint
        assert_eq!(manager.get_task_progress(task.id).unwrap().progress, 50.0);

        manager.complete_task(task.id, json!(null)).await.unwrap();
        assert_eq!(manager.get_task_progress(task.id).unwrap().progress, 100.0);
    }

    #[tokio::test]
    async fn test_progress_with_estimate_caps_at_95() {
        let manager = manager_with_agent();
        let task = simple_task(&manager).await;
        manager.assign_task(task.id, "builder-1").await.unwrap();
        manager.start_task(task.id).await.unwrap();

        // Backdate the start and give a tiny estimate so elapsed >> estimate
        {
            let mut tasks = manager.tasks.write().unwrap();
            let t = tasks.get_mut(&task.id).unwrap();
            t.estimated_duration = Some(Duration::from_millis(1));
            t.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        }

        let progress = manager.get_task_progress(task.id).unwrap();
        assert_eq!(progress.progress, 95.0);
    }

    #[tokio::test]
    async fn test_checkpoints_through_manager() {
        let manager = manager_with_agent();
        let task = simple_task(&manager).await;
        manager.assign_task(task.id, "builder-1").await.unwrap();

        manager
            .create_checkpoint(task.id, "halfway", json!({"done": 50}))
            .await
            .unwrap();
        manager
            .create_checkpoint(task.id, "nearly", json!({"done": 90}))
            .await
            .unwrap();

        let latest = manager.get_latest_checkpoint(task.id).unwrap();
        assert_eq!(latest.name, "nearly");
        assert_eq!(latest.agent_id.as_deref(), Some("builder-1"));

        let record = manager.get_task(task.id).await.unwrap();
        assert_eq!(record.checkpoint_data.unwrap()["done"], 90);
    }

    #[tokio::test]
    async fn test_task_stats() {
        let manager = manager_with_agent();
        let t1 = simple_task(&manager).await;
        let _t2 = simple_task(&manager).await;
        manager.complete_task(t1.id, json!(null)).await.unwrap();

        let stats = manager.task_stats().await;
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["completed"], 1);
        assert_eq!(stats["pending"], 1);
    }

    #[tokio::test]
    async fn test_cache_survives_backend_failures() {
        use crate::cache::TaskCache;
        use async_trait::async_trait;

        /// Cache that fails every operation
        struct BrokenCache;

        #[async_trait]
        impl TaskCache for BrokenCache {
            async fn get(&self, _key: &str) -> std::result::Result<Option<Value>, String> {
                Err("backend down".to_string())
            }
            async fn put(
                &self,
                _key: &str,
                _value: Value,
                _ttl: Duration,
            ) -> std::result::Result<(), String> {
                Err("backend down".to_string())
            }
            async fn delete(&self, _key: &str) -> std::result::Result<(), String> {
                Err("backend down".to_string())
            }
        }

        let pool = Arc::new(AgentPool::new());
        let manager = TaskManager::with_cache(pool, Arc::new(BrokenCache));

        // Every operation still succeeds despite the cache failing
        let task = simple_task(&manager).await;
        assert_eq!(manager.get_task(task.id).await.unwrap().id, task.id);
        manager.complete_task(task.id, json!(null)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tasks_for_agent() {
        let manager = manager_with_agent();
        let t1 = simple_task(&manager).await;
        let _other = simple_task(&manager).await;
        manager.assign_task(t1.id, "builder-1").await.unwrap();

        let held = manager.tasks_for_agent("builder-1").await;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, t1.id);
    }
}
