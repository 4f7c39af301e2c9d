//! Service registration and discovery for distributed workers
//!
//! This crate tracks network services by name with TTL-based records,
//! probes their health by protocol, and resolves service names through
//! an ordered chain of discovery strategies.
//!
//! # Architecture
//!
//! - [`ServiceRegistry`] owns all [`ServiceInfo`] records and runs the
//!   cleanup and health-check background loops.
//! - [`HealthMonitor`] layers hysteresis on top of the registry so a
//!   single probe result never flips a service's status.
//! - [`DiscoveryClient`] composes [`DiscoveryStrategy`] implementations
//!   (well-known port, registry, DNS, multicast broadcast) in a
//!   configured fallback order.
//! - [`PortAllocator`] hands out non-conflicting ports per service class.
//! - [`ConfigManager`] holds the live configuration with validated,
//!   all-or-nothing updates.
//!
//! # Example
//!
//! ```no_run
//! use service_registry::{DiscoveryClient, ConfigManager, Protocol, ServiceInfo, ServiceRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> service_registry::Result<()> {
//! let config = Arc::new(ConfigManager::with_defaults());
//! let registry = Arc::new(ServiceRegistry::new(config.clone()));
//! registry.start()?;
//!
//! let client = DiscoveryClient::new(config, registry.clone());
//! client.register(ServiceInfo::new("api", "127.0.0.1", 0, Protocol::Http))?;
//!
//! let resolved = client.discover("api").await?;
//! println!("api lives at {}:{}", resolved.host, resolved.port);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod broadcast;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod models;
pub mod ports;
pub mod probe;
pub mod registry;

pub use broadcast::{BroadcastAnnouncer, BroadcastListener};
pub use config::{ConfigManager, DiscoveryConfig, StrategyKind};
pub use discovery::{
    BroadcastStrategy, DiscoveryClient, DiscoveryStrategy, DnsStrategy, RegistryStrategy,
    ResolvedService, WellKnownPortStrategy,
};
pub use error::{Error, Result};
pub use health::{HealthCheck, HealthMonitor, HealthMonitorConfig};
pub use models::{HealthCheckResult, PortRange, Protocol, ServiceInfo};
pub use ports::PortAllocator;
pub use probe::ServiceProber;
pub use registry::ServiceRegistry;

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        ConfigManager, DiscoveryClient, DiscoveryConfig, Error, HealthMonitor, PortAllocator,
        Protocol, Result, ServiceInfo, ServiceRegistry,
    };
}
