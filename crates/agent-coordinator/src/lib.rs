//! Capability-matched assignment of tasks to worker agents
//!
//! The coordinator routes tasks from the task manager onto registered
//! agents. Selection filters agents by capacity, capability coverage and
//! circuit-breaker state; chronically failing agents are excluded until
//! their breaker's cooldown admits a half-open probe.
//!
//! Execution itself is delegated to an injected [`AgentExecutor`], so the
//! crate stays transport-agnostic: in-process workers, RPC clients and
//! subprocess runners all plug in behind the same trait.

#![warn(missing_docs)]

pub mod breaker;
pub mod coordinator;
pub mod error;

pub use breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use coordinator::{AgentCoordinator, AgentExecutor, AgentStats};
pub use error::{Error, Result};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        AgentCoordinator, AgentExecutor, BreakerState, CircuitBreakerConfig, Error, Result,
    };
}
