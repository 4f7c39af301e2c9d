//! Data models for the service registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Network protocol a registered service speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Raw TCP
    Tcp,
    /// Raw UDP
    Udp,
    /// HTTP protocol
    Http,
    /// HTTPS protocol
    Https,
    /// gRPC protocol
    Grpc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Grpc => "grpc",
        };
        f.write_str(s)
    }
}

/// A registered service record
///
/// Records are owned exclusively by the [`ServiceRegistry`](crate::ServiceRegistry);
/// accessors hand out clones so external code never aliases registry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique service name
    pub name: String,

    /// Hostname or IP the service is reachable at
    pub host: String,

    /// Listening port
    pub port: u16,

    /// Wire protocol
    pub protocol: Protocol,

    /// Service version
    pub version: String,

    /// Free-form metadata (e.g. "health_endpoint": "/healthz")
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When the service was first registered
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat received
    pub last_heartbeat: DateTime<Utc>,

    /// Time-to-live; zero means the record never expires
    pub ttl: Duration,

    /// Result of the most recent health evaluation
    pub healthy: bool,
}

impl ServiceInfo {
    /// Create a new service record with default metadata and TTL
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            host: host.into(),
            port,
            protocol,
            version: "0.0.0".to_string(),
            metadata: HashMap::new(),
            registered_at: now,
            last_heartbeat: now,
            ttl: Duration::ZERO,
            healthy: true,
        }
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the record TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidServiceInfo(
                "service name cannot be empty".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidServiceInfo(
                "service host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(Error::InvalidServiceInfo(
                "service port must be in [1, 65535]".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` dial address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// HTTP health endpoint, defaulting to `/health`
    pub fn health_endpoint(&self) -> &str {
        self.metadata
            .get("health_endpoint")
            .map(|s| s.as_str())
            .unwrap_or("/health")
    }

    /// gRPC service name to health-check; empty string means server-overall
    pub fn grpc_service_name(&self) -> &str {
        self.metadata
            .get("grpc_service_name")
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    /// Whether the record has outlived its TTL at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        let elapsed = now
            .signed_duration_since(self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed > self.ttl
    }

    /// Whether the record has outlived its TTL
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// An inclusive TCP port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range
    pub start: u16,
    /// Last port in the range
    pub end: u16,
}

impl PortRange {
    /// Create a validated port range
    pub fn new(start: u16, end: u16) -> Result<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Check range invariants: `1 <= start <= end`
    pub fn validate(&self) -> Result<()> {
        if self.start == 0 {
            return Err(Error::InvalidPortRange(format!(
                "range start must be >= 1, got {}",
                self.start
            )));
        }
        if self.start > self.end {
            return Err(Error::InvalidPortRange(format!(
                "range start {} exceeds end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Whether `port` falls inside the range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Iterate over all ports in the range
    pub fn iter(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

/// Outcome of a single health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Service that was probed
    pub service_name: String,

    /// Whether the probe succeeded
    pub healthy: bool,

    /// Probe round-trip time
    pub latency: Duration,

    /// When the probe completed
    pub timestamp: DateTime<Utc>,

    /// Failure detail when unhealthy
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// A successful probe result
    pub fn ok(service_name: impl Into<String>, latency: Duration) -> Self {
        Self {
            service_name: service_name.into(),
            healthy: true,
            latency,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// A failed probe result
    pub fn failed(
        service_name: impl Into<String>,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            healthy: false,
            latency,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}
