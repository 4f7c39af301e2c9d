//! Worker agent records and the shared agent pool

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Availability state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and free
    Idle,
    /// Executing at least one task
    Busy,
    /// Not reachable
    Offline,
    /// Faulted; excluded from scheduling
    Error,
}

/// Point-in-time resource usage reported by an agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResources {
    /// CPU utilization in percent
    pub cpu_percent: f32,
    /// Memory utilization in percent
    pub memory_percent: f32,
}

/// An executor node that claims tasks and reports results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque agent identifier
    pub id: String,

    /// Kind of agent (e.g. "builder", "tester")
    pub agent_type: String,

    /// Named capabilities the agent claims to satisfy
    pub capabilities: HashSet<String>,

    /// Availability state
    pub status: AgentStatus,

    /// Tasks currently held
    pub current_task_count: u32,

    /// Concurrency ceiling
    pub max_concurrent_tasks: u32,

    /// Latest resource snapshot
    pub resources: AgentResources,

    /// Last heartbeat received
    pub last_heartbeat: DateTime<Utc>,
}

impl Agent {
    /// Create an idle agent
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        max_concurrent_tasks: u32,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: AgentStatus::Idle,
            current_task_count: 0,
            max_concurrent_tasks,
            resources: AgentResources::default(),
            last_heartbeat: Utc::now(),
        }
    }

    /// Whether the agent may take on another task
    pub fn can_accept(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Busy)
            && self.current_task_count < self.max_concurrent_tasks
    }

    /// Whether the agent holds every required capability
    pub fn has_capabilities(&self, required: &[&str]) -> bool {
        required.iter().all(|c| self.capabilities.contains(*c))
    }

    /// Capabilities from `required` the agent is missing
    pub fn missing_capabilities(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.capabilities.contains(**c))
            .map(|c| c.to_string())
            .collect()
    }
}

/// Shared registry of agents with capacity accounting
///
/// Both the task manager and the coordinator hold the pool by `Arc`:
/// assignment bumps an agent's task count here, completion and failure
/// decrement it, and the Idle/Busy flag follows the count.
pub struct AgentPool {
    agents: RwLock<HashMap<String, Agent>>,
    /// Registration order, for deterministic tie-breaking
    order: RwLock<Vec<String>>,
}

impl AgentPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Register a new agent
    pub fn register(&self, agent: Agent) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        if agents.contains_key(&agent.id) {
            return Err(Error::AgentExists(agent.id));
        }
        info!(
            "Registered agent '{}' ({}) with {} capabilities",
            agent.id,
            agent.agent_type,
            agent.capabilities.len()
        );
        self.order.write().unwrap().push(agent.id.clone());
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Remove an agent
    pub fn deregister(&self, id: &str) -> Result<Agent> {
        let removed = self
            .agents
            .write()
            .unwrap()
            .remove(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        self.order.write().unwrap().retain(|x| x != id);
        Ok(removed)
    }

    /// Get an agent by id, as a copy
    pub fn get(&self, id: &str) -> Result<Agent> {
        self.agents
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))
    }

    /// Snapshot of all agents, in registration order
    pub fn list(&self) -> Vec<Agent> {
        let agents = self.agents.read().unwrap();
        self.order
            .read()
            .unwrap()
            .iter()
            .filter_map(|id| agents.get(id).cloned())
            .collect()
    }

    /// Refresh an agent's heartbeat and resources
    pub fn heartbeat(&self, id: &str, resources: Option<AgentResources>) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.last_heartbeat = Utc::now();
        if let Some(resources) = resources {
            agent.resources = resources;
        }
        Ok(())
    }

    /// Overwrite an agent's availability state
    pub fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.status = status;
        Ok(())
    }

    /// Account for a newly assigned task; fails when the agent is full
    pub fn increment_task_count(&self, id: &str) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        if !agent.can_accept() {
            return Err(Error::AgentAtCapacity(id.to_string()));
        }

        agent.current_task_count += 1;
        agent.status = AgentStatus::Busy;
        debug!(
            "Agent '{}' now holds {}/{} tasks",
            id, agent.current_task_count, agent.max_concurrent_tasks
        );
        Ok(())
    }

    /// Account for a finished task; the count floors at zero
    pub fn decrement_task_count(&self, id: &str) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        agent.current_task_count = agent.current_task_count.saturating_sub(1);
        if agent.current_task_count == 0 && agent.status == AgentStatus::Busy {
            agent.status = AgentStatus::Idle;
        }
        Ok(())
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(id: &str) -> Agent {
        Agent::new(id, "builder", ["compilation", "build_tools"], 2)
    }

    #[test]
    fn test_register_and_duplicate() {
        let pool = AgentPool::new();
        pool.register(builder("a1")).unwrap();
        assert!(matches!(
            pool.register(builder("a1")),
            Err(Error::AgentExists(_))
        ));
        assert_eq!(pool.list().len(), 1);
    }

    #[test]
    fn test_capability_matching() {
        let agent = builder("a1");
        assert!(agent.has_capabilities(&["compilation"]));
        assert!(agent.has_capabilities(&["compilation", "build_tools"]));
        assert!(!agent.has_capabilities(&["compilation", "gpu"]));
        assert_eq!(agent.missing_capabilities(&["compilation", "gpu"]), vec!["gpu"]);
    }

    #[test]
    fn test_capacity_accounting_flips_status() {
        let pool = AgentPool::new();
        pool.register(builder("a1")).unwrap();

        pool.increment_task_count("a1").unwrap();
        let agent = pool.get("a1").unwrap();
        assert_eq!(agent.current_task_count, 1);
        assert_eq!(agent.status, AgentStatus::Busy);

        pool.increment_task_count("a1").unwrap();
        // Third assignment exceeds max_concurrent_tasks = 2
        assert!(matches!(
            pool.increment_task_count("a1"),
            Err(Error::AgentAtCapacity(_))
        ));

        pool.decrement_task_count("a1").unwrap();
        pool.decrement_task_count("a1").unwrap();
        let agent = pool.get("a1").unwrap();
        assert_eq!(agent.current_task_count, 0);
        assert_eq!(agent.status, AgentStatus::Idle);

        // Floor at zero
        pool.decrement_task_count("a1").unwrap();
        assert_eq!(pool.get("a1").unwrap().current_task_count, 0);
    }

    #[test]
    fn test_offline_agents_cannot_accept() {
        let pool = AgentPool::new();
        pool.register(builder("a1")).unwrap();
        pool.set_status("a1", AgentStatus::Offline).unwrap();

        assert!(!pool.get("a1").unwrap().can_accept());
        assert!(pool.increment_task_count("a1").is_err());
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let pool = AgentPool::new();
        for id in ["z", "m", "a"] {
            pool.register(builder(id)).unwrap();
        }
        let ids: Vec<String> = pool.list().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_heartbeat_updates_resources() {
        let pool = AgentPool::new();
        pool.register(builder("a1")).unwrap();

        pool.heartbeat(
            "a1",
            Some(AgentResources {
                cpu_percent: 42.0,
                memory_percent: 17.5,
            }),
        )
        .unwrap();

        let agent = pool.get("a1").unwrap();
        assert_eq!(agent.resources.cpu_percent, 42.0);

        assert!(pool.heartbeat("ghost", None).is_err());
    }
}
