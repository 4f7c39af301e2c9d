//! Task data model and lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting to be scheduled
    Pending,
    /// Assigned to an agent but not started
    Assigned,
    /// Executing on an agent
    Running,
    /// Finished successfully (terminal)
    Completed,
    /// Exhausted its retries (terminal)
    Failed,
    /// Suspended by an operator
    Paused,
    /// No suitable worker was available
    WaitingForWorker,
    /// Blocked on incomplete dependencies
    WaitingForDependencies,
}

impl TaskStatus {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Scheduling priority; higher values are drained first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work
    Low,
    /// Default priority
    Normal,
    /// Ahead of normal traffic
    High,
    /// Drained before everything else
    Critical,
}

impl TaskPriority {
    /// Numeric weight of the priority
    pub fn value(&self) -> u8 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Normal => 5,
            TaskPriority::High => 10,
            TaskPriority::Critical => 20,
        }
    }
}

/// How damaging a task failure is to the wider workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure is tolerable
    Low,
    /// Default criticality
    Normal,
    /// Failure degrades the workflow
    High,
    /// Failure blocks the workflow
    Critical,
}

/// Kind of work a task represents, which fixes its capability requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Compile or build artifacts
    Building,
    /// Execute test suites
    Testing,
    /// Restructure source code
    Refactoring,
    /// Diagnose failures
    Debugging,
    /// Anything else, named by the producer
    Custom(String),
}

impl TaskType {
    /// Capabilities an agent must hold to execute this task type
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        match self {
            TaskType::Building => &["compilation", "build_tools"],
            TaskType::Testing => &["test_execution", "coverage_analysis"],
            TaskType::Refactoring => &["code_analysis", "refactoring_tools"],
            TaskType::Debugging => &["debugging", "error_analysis"],
            TaskType::Custom(_) => &["general_computation"],
        }
    }
}

/// A unit of work with a typed payload, priority, dependencies and lifecycle
///
/// Tasks are owned exclusively by the [`TaskManager`](crate::TaskManager);
/// callers always receive copies and refer to tasks by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier
    pub id: Uuid,

    /// Kind of work
    pub task_type: TaskType,

    /// Free-form payload
    pub data: HashMap<String, Value>,

    /// Lifecycle state
    pub status: TaskStatus,

    /// Scheduling priority
    pub priority: TaskPriority,

    /// Failure impact classification
    pub criticality: Criticality,

    /// Agent currently holding the task
    pub assigned_agent: Option<String>,

    /// First agent the task was ever assigned to
    pub original_agent: Option<String>,

    /// Tasks that must complete before this one runs
    pub dependencies: Vec<Uuid>,

    /// Failures so far
    pub retry_count: u32,

    /// Failures allowed before the task goes terminal
    pub max_retries: u32,

    /// Message from the most recent failure
    pub error_message: Option<String>,

    /// Result payload from successful completion
    pub result_data: Option<Value>,

    /// Most recent checkpoint payload
    pub checkpoint_data: Option<Value>,

    /// Producer's runtime estimate, used for progress reporting
    pub estimated_duration: Option<Duration>,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal success
    pub completed_at: Option<DateTime<Utc>>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Default retry budget for new tasks
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Task {
    /// Create a pending task
    pub fn new(
        task_type: TaskType,
        data: HashMap<String, Value>,
        priority: TaskPriority,
        criticality: Criticality,
        dependencies: Vec<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type,
            data,
            status: TaskStatus::Pending,
            priority,
            criticality,
            assigned_agent: None,
            original_agent: None,
            dependencies,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            result_data: None,
            checkpoint_data: None,
            estimated_duration: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Capabilities an executing agent must hold
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        self.task_type.required_capabilities()
    }

    /// Stamp a mutation
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Progress snapshot for observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Current lifecycle state
    pub status: TaskStatus,

    /// Estimated completion in percent, within `[0, 100]`
    pub progress: f64,

    /// When execution started, if it has
    pub started_at: Option<DateTime<Utc>>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}
