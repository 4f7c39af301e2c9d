//! Error types for agent coordination

use thiserror::Error;
use uuid::Uuid;

/// Agent coordination error type
#[derive(Error, Debug)]
pub enum Error {
    /// No registered agent can take the task right now
    #[error("No suitable agent for task {0}")]
    NoSuitableAgent(Uuid),

    /// The assigned agent reported an execution failure
    #[error("Execution of task {task} failed: {reason}")]
    ExecutionFailed {
        /// Task that failed
        task: Uuid,
        /// Agent-reported reason
        reason: String,
    },

    /// The caller cancelled execution
    #[error("Execution of task {0} was cancelled")]
    Cancelled(Uuid),

    /// The coordinator is shutting down and refuses new work
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    /// Agent not found
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Task management error
    #[error("Task error: {0}")]
    Task(#[from] task_manager::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
