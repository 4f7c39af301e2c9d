//! Live discovery configuration with validated, all-or-nothing updates

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::PortRange;

/// A discovery strategy selector, composed in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Probe the well-known port map on localhost
    WellKnownPort,
    /// Look the service up in the local registry
    Registry,
    /// Resolve the service name through DNS
    Dns,
    /// Consult UDP multicast announcements
    Broadcast,
}

/// Full configuration surface for discovery, registration and probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Port ranges per service class
    pub port_ranges: HashMap<String, PortRange>,

    /// Ports excluded from allocation
    pub reserved_ports: Vec<u16>,

    /// Fall back to the ephemeral window when a class range is exhausted
    pub allow_ephemeral: bool,

    /// First port of the ephemeral window
    pub ephemeral_start: u16,

    /// Last port of the ephemeral window
    pub ephemeral_end: u16,

    /// TTL stamped on records registered with zero TTL
    pub default_ttl: Duration,

    /// How often expired records are evicted
    pub cleanup_interval: Duration,

    /// Whether the registry runs its health-check loop
    pub enable_health_check: bool,

    /// How often the registry probes registered services
    pub health_check_interval: Duration,

    /// Per-probe transport timeout
    pub health_check_timeout: Duration,

    /// Whether multicast announcements are sent and consumed
    pub enable_broadcast: bool,

    /// Multicast group address, `ip:port`
    pub broadcast_address: String,

    /// Interval between multicast announcements
    pub announcement_interval: Duration,

    /// IP TTL on announcement packets
    pub broadcast_ttl: u32,

    /// Whether the DNS strategy participates in discovery
    pub enable_dns: bool,

    /// Whether the registry strategy participates in discovery
    pub enable_registry: bool,

    /// Well-known service-name to port map
    pub default_ports: HashMap<String, u16>,

    /// Strategy fallback order for discovery
    pub preferred_strategies: Vec<StrategyKind>,

    /// Hard cap on registered services
    pub max_services: usize,

    /// Log level hint for embedding applications
    pub log_level: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let mut port_ranges = HashMap::new();
        port_ranges.insert("http".to_string(), PortRange { start: 8000, end: 8099 });
        port_ranges.insert("grpc".to_string(), PortRange { start: 9000, end: 9099 });
        port_ranges.insert("metrics".to_string(), PortRange { start: 9100, end: 9199 });
        port_ranges.insert("worker".to_string(), PortRange { start: 7000, end: 7099 });

        let mut default_ports = HashMap::new();
        default_ports.insert("postgres".to_string(), 5432);
        default_ports.insert("redis".to_string(), 6379);
        default_ports.insert("grpc".to_string(), 9090);
        default_ports.insert("metrics".to_string(), 9100);
        default_ports.insert("api".to_string(), 8080);

        Self {
            port_ranges,
            reserved_ports: Vec::new(),
            allow_ephemeral: true,
            ephemeral_start: 49152,
            ephemeral_end: 65535,
            default_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            enable_health_check: true,
            health_check_interval: Duration::from_secs(15),
            health_check_timeout: Duration::from_secs(5),
            enable_broadcast: false,
            broadcast_address: "239.255.70.70:8998".to_string(),
            announcement_interval: Duration::from_secs(10),
            broadcast_ttl: 1,
            enable_dns: true,
            enable_registry: true,
            default_ports,
            preferred_strategies: vec![
                StrategyKind::WellKnownPort,
                StrategyKind::Registry,
                StrategyKind::Dns,
            ],
            max_services: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        for (class, range) in &self.port_ranges {
            range
                .validate()
                .map_err(|e| Error::InvalidConfig(format!("class '{}': {}", class, e)))?;
        }

        if self.allow_ephemeral {
            if self.ephemeral_start == 0 {
                return Err(Error::InvalidConfig(
                    "ephemeral window must start at port >= 1".to_string(),
                ));
            }
            if self.ephemeral_start > self.ephemeral_end {
                return Err(Error::InvalidConfig(format!(
                    "ephemeral window start {} exceeds end {}",
                    self.ephemeral_start, self.ephemeral_end
                )));
            }
        }

        for (field, interval) in [
            ("cleanup_interval", self.cleanup_interval),
            ("health_check_interval", self.health_check_interval),
            ("health_check_timeout", self.health_check_timeout),
            ("announcement_interval", self.announcement_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::InvalidConfig(format!("{} must be positive", field)));
            }
        }

        if self.broadcast_ttl > 255 {
            return Err(Error::InvalidConfig(format!(
                "broadcast TTL must be in [0, 255], got {}",
                self.broadcast_ttl
            )));
        }

        if self.max_services == 0 {
            return Err(Error::InvalidConfig(
                "max_services must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

type UpdateCallback = Box<dyn Fn(&DiscoveryConfig) -> std::result::Result<(), String> + Send + Sync>;

/// Thread-safe holder of the live [`DiscoveryConfig`]
///
/// Reads return copies. Updates are all-or-nothing: the candidate is
/// validated, every registered callback runs against it, and only if all
/// succeed does the new config become visible to readers.
pub struct ConfigManager {
    config: RwLock<DiscoveryConfig>,
    locked: RwLock<bool>,
    callbacks: Mutex<Vec<UpdateCallback>>,
}

impl ConfigManager {
    /// Create a manager around a validated configuration
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            locked: RwLock::new(false),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Create a manager with the default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: RwLock::new(DiscoveryConfig::default()),
            locked: RwLock::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Current configuration, as a defensive copy
    pub fn get_config(&self) -> DiscoveryConfig {
        self.config.read().unwrap().clone()
    }

    /// Register a callback consulted on every update
    ///
    /// Callbacks run in registration order. A callback returning `Err`
    /// aborts the update and the previous configuration stays in place.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&DiscoveryConfig) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Replace the configuration wholesale
    pub fn update_config(&self, candidate: DiscoveryConfig) -> Result<()> {
        // Hold the write lock across validation and callbacks so readers
        // observe either the old or the new config, never a mixture.
        let mut current = self.config.write().unwrap();

        if *self.locked.read().unwrap() {
            return Err(Error::ConfigLocked);
        }

        candidate.validate()?;

        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            if let Err(reason) = callback(&candidate) {
                debug!("Config update rejected by callback: {}", reason);
                return Err(Error::UpdateRejected(reason));
            }
        }

        *current = candidate;
        info!("Discovery configuration updated");
        Ok(())
    }

    /// Apply a mutation to a copy of the current config, then update
    pub fn update_partial<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut DiscoveryConfig),
    {
        let mut candidate = self.get_config();
        mutate(&mut candidate);
        self.update_config(candidate)
    }

    /// Refuse further writes until [`ConfigManager::unlock`]
    pub fn lock(&self) {
        *self.locked.write().unwrap() = true;
        info!("Discovery configuration locked");
    }

    /// Allow writes again
    pub fn unlock(&self) {
        *self.locked.write().unwrap() = false;
        info!("Discovery configuration unlocked");
    }

    /// Whether writes are currently refused
    pub fn is_locked(&self) -> bool {
        *self.locked.read().unwrap()
    }

    /// Export the full state as a JSON mapping for admin inspection
    ///
    /// Duration fields are rendered as humantime strings (`"30s"`, `"1m 30s"`).
    pub fn export(&self) -> Value {
        let config = self.get_config();
        let fmt = |d: Duration| humantime::format_duration(d).to_string();

        let port_ranges: HashMap<&String, Value> = config
            .port_ranges
            .iter()
            .map(|(class, range)| (class, json!({ "start": range.start, "end": range.end })))
            .collect();

        json!({
            "port_ranges": port_ranges,
            "reserved_ports": config.reserved_ports,
            "allow_ephemeral": config.allow_ephemeral,
            "ephemeral_start": config.ephemeral_start,
            "ephemeral_end": config.ephemeral_end,
            "default_ttl": fmt(config.default_ttl),
            "cleanup_interval": fmt(config.cleanup_interval),
            "enable_health_check": config.enable_health_check,
            "health_check_interval": fmt(config.health_check_interval),
            "health_check_timeout": fmt(config.health_check_timeout),
            "enable_broadcast": config.enable_broadcast,
            "broadcast_address": config.broadcast_address,
            "announcement_interval": fmt(config.announcement_interval),
            "broadcast_ttl": config.broadcast_ttl,
            "enable_dns": config.enable_dns,
            "enable_registry": config.enable_registry,
            "default_ports": config.default_ports,
            "preferred_strategies": config.preferred_strategies,
            "max_services": config.max_services,
            "log_level": config.log_level,
        })
    }
}
