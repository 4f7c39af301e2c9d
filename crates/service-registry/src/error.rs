//! Error types for the service registry

use std::time::Duration;
use thiserror::Error;

/// Service registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Service already registered
    #[error("Service already registered: {0}")]
    ServiceExists(String),

    /// Malformed service record
    #[error("Invalid service info: {0}")]
    InvalidServiceInfo(String),

    /// Registry is at its configured capacity
    #[error("Service limit reached ({0} services)")]
    MaxServicesReached(usize),

    /// Port allocation exhausted every candidate
    #[error("No available port for service '{0}'")]
    NoAvailablePort(String),

    /// Malformed port range
    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    /// Configuration writes are locked
    #[error("Configuration is locked")]
    ConfigLocked,

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration update callback rejected the candidate
    #[error("Configuration update rejected: {0}")]
    UpdateRejected(String),

    /// Component already has a running background loop
    #[error("Already running")]
    AlreadyRunning,

    /// Component has no running background loop
    #[error("Not running")]
    NotRunning,

    /// No discovery strategy could resolve the service
    #[error("Service '{0}' could not be resolved by any strategy")]
    ResolutionFailed(String),

    /// Discovery did not finish within the deadline
    #[error("Discovery of '{name}' timed out after {timeout:?}")]
    DiscoveryTimeout {
        /// Service being resolved
        name: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Health probe transport failure
    #[error("Probe error: {0}")]
    Probe(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
