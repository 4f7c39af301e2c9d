//! Capability-matched coordination of tasks onto agents

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use task_manager::{Agent, Criticality, Task, TaskManager, TaskPriority, TaskStatus, TaskType};

use crate::breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use crate::error::{Error, Result};

/// Executes a task on a concrete agent
///
/// Implementations carry the actual transport: an in-process worker, an
/// RPC client, a subprocess. The coordinator only sees success with a
/// result payload or failure with a reason.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the task on the agent to completion
    async fn execute(&self, agent: &Agent, task: &Task) -> std::result::Result<Value, String>;
}

/// Per-agent execution counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    /// Agent these counters belong to
    pub agent_id: String,
    /// Executions routed to the agent
    pub executed: u64,
    /// Executions that completed
    pub succeeded: u64,
    /// Executions that failed
    pub failed: u64,
    /// Timestamp of the most recent routing decision
    pub last_activity: DateTime<Utc>,
}

impl AgentStats {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            executed: 0,
            succeeded: 0,
            failed: 0,
            last_activity: Utc::now(),
        }
    }
}

/// Routes tasks to capable agents behind per-agent circuit breakers
pub struct AgentCoordinator {
    manager: Arc<TaskManager>,
    executor: Arc<dyn AgentExecutor>,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    stats: RwLock<HashMap<String, AgentStats>>,
    shutdown: CancellationToken,
}

impl AgentCoordinator {
    /// Create a coordinator over a task manager and an executor
    pub fn new(manager: Arc<TaskManager>, executor: Arc<dyn AgentExecutor>) -> Self {
        Self::with_breaker_config(manager, executor, CircuitBreakerConfig::default())
    }

    /// Create a coordinator with explicit breaker tuning
    pub fn with_breaker_config(
        manager: Arc<TaskManager>,
        executor: Arc<dyn AgentExecutor>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            manager,
            executor,
            breaker_config,
            breakers: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an agent with the shared pool and give it a breaker
    pub fn register_agent(&self, agent: Agent) -> Result<()> {
        let agent_id = agent.id.clone();
        self.manager.agents().register(agent)?;
        self.breakers.write().unwrap().insert(
            agent_id.clone(),
            Arc::new(CircuitBreaker::new(self.breaker_config.clone())),
        );
        self.stats
            .write()
            .unwrap()
            .insert(agent_id.clone(), AgentStats::new(&agent_id));
        Ok(())
    }

    /// Create and enqueue a task through the manager
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        data: HashMap<String, Value>,
        priority: TaskPriority,
        criticality: Criticality,
        dependencies: Vec<Uuid>,
    ) -> Result<Task> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        Ok(self
            .manager
            .create_task(task_type, data, priority, criticality, dependencies)
            .await?)
    }

    /// Execute a task end to end on the best available agent
    ///
    /// Selection filters to agents that are under capacity, cover the
    /// task's required capabilities and whose breaker admits requests;
    /// ties break on the lowest task count, then registration order.
    /// Cancellation through `cancel` surfaces [`Error::Cancelled`] and
    /// leaves the task in a non-completed state.
    pub async fn execute_task(&self, task_id: Uuid, cancel: &CancellationToken) -> Result<Value> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let task = self.manager.get_task(task_id).await?;
        let agent = self.select_agent(&task)?;
        debug!("Selected agent '{}' for task {}", agent.id, task_id);

        self.manager.assign_task(task_id, &agent.id).await?;
        self.manager.start_task(task_id).await?;
        self.note_execution(&agent.id);

        let task = self.manager.get_task(task_id).await?;
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                info!("Execution of task {} cancelled", task_id);
                self.manager.fail_task(task_id, "execution cancelled").await?;
                return Err(Error::Cancelled(task_id));
            }
            outcome = self.executor.execute(&agent, &task) => outcome,
        };

        match outcome {
            Ok(result) => {
                self.manager.complete_task(task_id, result.clone()).await?;
                self.breaker_success(&agent.id);
                self.note_success(&agent.id);
                Ok(result)
            }
            Err(reason) => {
                warn!("Agent '{}' failed task {}: {}", agent.id, task_id, reason);
                self.manager.fail_task(task_id, reason.clone()).await?;
                self.breaker_failure(&agent.id);
                self.note_failure(&agent.id);
                Err(Error::ExecutionFailed {
                    task: task_id,
                    reason,
                })
            }
        }
    }

    /// Current lifecycle state of a task
    pub async fn get_task_status(&self, task_id: Uuid) -> Result<TaskStatus> {
        Ok(self.manager.get_task(task_id).await?.status)
    }

    /// Result payload of a completed task, when there is one
    pub async fn get_result(&self, task_id: Uuid) -> Result<Option<Value>> {
        Ok(self.manager.get_task(task_id).await?.result_data)
    }

    /// Snapshot of all registered agents
    pub fn list_agents(&self) -> Vec<Agent> {
        self.manager.agents().list()
    }

    /// Execution counters for one agent
    pub fn get_agent_stats(&self, agent_id: &str) -> Result<AgentStats> {
        self.stats
            .read()
            .unwrap()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    /// Breaker state for one agent
    pub fn get_circuit_breaker_state(&self, agent_id: &str) -> Result<BreakerState> {
        self.breakers
            .read()
            .unwrap()
            .get(agent_id)
            .map(|b| b.state())
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    /// Breaker statistics for every agent
    pub fn get_circuit_breaker_stats(&self) -> HashMap<String, BreakerStats> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(id, breaker)| (id.clone(), breaker.stats()))
            .collect()
    }

    /// Refuse new work; in-flight executions observe their own tokens
    pub fn shutdown(&self) {
        info!("Coordinator shutting down");
        self.shutdown.cancel();
    }

    /// Pick the best agent for a task, if any qualifies
    fn select_agent(&self, task: &Task) -> Result<Agent> {
        let required = task.required_capabilities();
        let breakers = self.breakers.read().unwrap();

        let candidate = self
            .manager
            .agents()
            .list()
            .into_iter()
            .filter(|agent| agent.can_accept())
            .filter(|agent| agent.has_capabilities(required))
            .filter(|agent| {
                breakers
                    .get(&agent.id)
                    .map(|b| b.allow_request())
                    // No breaker means the agent bypassed register_agent;
                    // treat it as admitted.
                    .unwrap_or(true)
            })
            // min_by_key keeps the first minimum, preserving registration order
            .min_by_key(|agent| agent.current_task_count);

        candidate.ok_or(Error::NoSuitableAgent(task.id))
    }

    fn breaker_success(&self, agent_id: &str) {
        if let Some(breaker) = self.breakers.read().unwrap().get(agent_id) {
            breaker.record_success();
        }
    }

    fn breaker_failure(&self, agent_id: &str) {
        if let Some(breaker) = self.breakers.read().unwrap().get(agent_id) {
            breaker.record_failure();
        }
    }

    fn note_execution(&self, agent_id: &str) {
        let mut stats = self.stats.write().unwrap();
        let entry = stats
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentStats::new(agent_id));
        entry.executed += 1;
        entry.last_activity = Utc::now();
    }

    fn note_success(&self, agent_id: &str) {
        let mut stats = self.stats.write().unwrap();
        if let Some(entry) = stats.get_mut(agent_id) {
            entry.succeeded += 1;
            entry.last_activity = Utc::now();
        }
    }

    fn note_failure(&self, agent_id: &str) {
        let mut stats = self.stats.write().unwrap();
        if let Some(entry) = stats.get_mut(agent_id) {
            entry.failed += 1;
            entry.last_activity = Utc::now();
        }
    }
}
