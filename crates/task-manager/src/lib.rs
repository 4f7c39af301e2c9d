//! Task lifecycle, priority queueing, dependency resolution and checkpointing
//!
//! This crate is the scheduling nucleus of the orchestration platform.
//! Producers create tasks through the [`TaskManager`]; the manager
//! validates dependencies, queues by priority, gates scheduling on
//! dependency completion, applies the retry policy and records
//! checkpoints. Worker agents live in the shared [`AgentPool`], which
//! both the manager and the coordinator consult for capability and
//! capacity decisions.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use task_manager::{Agent, AgentPool, Criticality, TaskManager, TaskPriority, TaskType};
//!
//! # async fn example() -> task_manager::Result<()> {
//! let pool = Arc::new(AgentPool::new());
//! pool.register(Agent::new("builder-1", "builder", ["compilation", "build_tools"], 4))?;
//!
//! let manager = TaskManager::new(pool);
//! let task = manager
//!     .create_task(
//!         TaskType::Building,
//!         HashMap::new(),
//!         TaskPriority::High,
//!         Criticality::Normal,
//!         vec![],
//!     )
//!     .await?;
//!
//! manager.assign_task(task.id, "builder-1").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod cache;
pub mod checkpoint;
pub mod deps;
pub mod error;
pub mod manager;
pub mod queue;
pub mod task;

pub use agent::{Agent, AgentPool, AgentResources, AgentStatus};
pub use cache::{MemoryCache, TaskCache};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use deps::DependencyManager;
pub use error::{Error, Result};
pub use manager::{SplitStrategy, SubtaskSpec, TaskManager};
pub use queue::{QueueStats, TaskQueue};
pub use task::{
    Criticality, DEFAULT_MAX_RETRIES, Task, TaskPriority, TaskProgress, TaskStatus, TaskType,
};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        Agent, AgentPool, Criticality, Error, Result, Task, TaskManager, TaskPriority, TaskStatus,
        TaskType,
    };
}
