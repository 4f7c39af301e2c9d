//! Error types for task management

use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Task management error type
#[derive(Error, Debug)]
pub enum Error {
    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A dependency references a task that does not exist
    #[error("Dependency not found: {0}")]
    DependencyNotFound(Uuid),

    /// The proposed dependencies would close a cycle
    #[error("Circular dependency involving task {0}")]
    CircularDependency(Uuid),

    /// The task is in a terminal state and cannot transition
    #[error("Task {id} is terminal ({status:?})")]
    TaskTerminal {
        /// Task that refused the transition
        id: Uuid,
        /// Its terminal status
        status: TaskStatus,
    },

    /// The task is not in the state the operation requires
    #[error("Task {id} is {actual:?}, expected {expected:?}")]
    InvalidTransition {
        /// Task that refused the transition
        id: Uuid,
        /// Its current status
        actual: TaskStatus,
        /// The status the operation requires
        expected: TaskStatus,
    },

    /// Agent not found
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Agent already registered
    #[error("Agent already registered: {0}")]
    AgentExists(String),

    /// Agent has no capacity for another task
    #[error("Agent {0} is at capacity")]
    AgentAtCapacity(String),

    /// Agent lacks capabilities the task requires
    #[error("Agent {agent} is missing capabilities: {missing:?}")]
    MissingCapabilities {
        /// Agent that was considered
        agent: String,
        /// Capabilities it lacks
        missing: Vec<String>,
    },

    /// No checkpoint recorded for the task
    #[error("No checkpoint found for task {0}")]
    CheckpointNotFound(Uuid),

    /// A split strategy could not produce subtasks
    #[error("Task split failed: {0}")]
    SplitFailed(String),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
