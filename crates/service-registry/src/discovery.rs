//! Multi-strategy service discovery
//!
//! Strategies are independent resolvers composed in a configured fallback
//! order; the first success wins. The client also fronts registration,
//! allocating a port when the caller registers with port zero.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::broadcast::{AnnouncementCache, BroadcastAnnouncer, BroadcastListener};
use crate::config::{ConfigManager, StrategyKind};
use crate::error::{Error, Result};
use crate::models::ServiceInfo;
use crate::ports::PortAllocator;
use crate::registry::ServiceRegistry;

/// Dial timeout for well-known port probes
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval for [`DiscoveryClient::wait_for_service`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A successfully resolved service location
#[derive(Debug, Clone)]
pub struct ResolvedService {
    /// Service name that was resolved
    pub name: String,
    /// Resolved host
    pub host: String,
    /// Resolved port
    pub port: u16,
    /// Strategy that produced the answer
    pub strategy: StrategyKind,
    /// Time the winning strategy took
    pub latency: Duration,
}

/// One named algorithm for locating a service
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Resolve a service name to `(host, port)`
    async fn resolve(&self, name: &str) -> Result<(String, u16)>;
}

/// Infer a port for a service name from the well-known map
///
/// Exact entries win; otherwise keyword heuristics cover the common
/// backing services.
fn infer_port(ports: &HashMap<String, u16>, name: &str) -> Option<u16> {
    if let Some(&port) = ports.get(name) {
        return Some(port);
    }

    for (keyword, port) in [
        ("postgres", 5432u16),
        ("redis", 6379),
        ("grpc", 9090),
        ("metrics", 9100),
        ("api", 8080),
    ] {
        if name.contains(keyword) {
            return Some(port);
        }
    }
    None
}

/// Probes `localhost:<well-known port>` with a short dial timeout
pub struct WellKnownPortStrategy {
    ports: HashMap<String, u16>,
}

impl WellKnownPortStrategy {
    /// Create the strategy from the configured port map
    pub fn new(ports: HashMap<String, u16>) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl DiscoveryStrategy for WellKnownPortStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WellKnownPort
    }

    async fn resolve(&self, name: &str) -> Result<(String, u16)> {
        let port = infer_port(&self.ports, name)
            .ok_or_else(|| Error::ResolutionFailed(name.to_string()))?;

        let address = format!("127.0.0.1:{}", port);
        match tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(("127.0.0.1".to_string(), port)),
            _ => Err(Error::ResolutionFailed(name.to_string())),
        }
    }
}

/// Looks the service up in the local registry
pub struct RegistryStrategy {
    registry: Arc<ServiceRegistry>,
}

impl RegistryStrategy {
    /// Create the strategy over a registry
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DiscoveryStrategy for RegistryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Registry
    }

    async fn resolve(&self, name: &str) -> Result<(String, u16)> {
        let service = self.registry.get(name)?;
        if !service.healthy || service.is_expired() {
            return Err(Error::ResolutionFailed(name.to_string()));
        }
        Ok((service.host, service.port))
    }
}

/// Resolves the service name as a hostname through DNS
pub struct DnsStrategy {
    resolver: hickory_resolver::TokioAsyncResolver,
    ports: HashMap<String, u16>,
}

impl DnsStrategy {
    /// Create the strategy with default resolver configuration
    pub fn new(ports: HashMap<String, u16>) -> Self {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio(
            hickory_resolver::config::ResolverConfig::default(),
            hickory_resolver::config::ResolverOpts::default(),
        );
        Self { resolver, ports }
    }
}

#[async_trait]
impl DiscoveryStrategy for DnsStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dns
    }

    async fn resolve(&self, name: &str) -> Result<(String, u16)> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|_| Error::ResolutionFailed(name.to_string()))?;

        let ip: IpAddr = lookup
            .iter()
            .next()
            .ok_or_else(|| Error::ResolutionFailed(name.to_string()))?;

        let port = infer_port(&self.ports, name).unwrap_or(80);
        Ok((ip.to_string(), port))
    }
}

/// Consults services heard over UDP multicast
pub struct BroadcastStrategy {
    cache: AnnouncementCache,
}

impl BroadcastStrategy {
    /// Create the strategy over a listener's announcement cache
    pub fn new(cache: AnnouncementCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl DiscoveryStrategy for BroadcastStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Broadcast
    }

    async fn resolve(&self, name: &str) -> Result<(String, u16)> {
        let cache = self.cache.read().unwrap();
        let service = cache
            .get(name)
            .ok_or_else(|| Error::ResolutionFailed(name.to_string()))?;
        if service.is_expired_at(Utc::now()) {
            return Err(Error::ResolutionFailed(name.to_string()));
        }
        Ok((service.host.clone(), service.port))
    }
}

/// Multi-strategy resolver fronting the registry and port allocator
pub struct DiscoveryClient {
    config: Arc<ConfigManager>,
    registry: Arc<ServiceRegistry>,
    allocator: Mutex<PortAllocator>,
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    listener: Option<BroadcastListener>,
    announcer: Option<BroadcastAnnouncer>,
}

impl DiscoveryClient {
    /// Build a client with strategies in the configured preference order
    ///
    /// Strategies disabled in the configuration are skipped even when
    /// they appear in the preference list.
    pub fn new(config: Arc<ConfigManager>, registry: Arc<ServiceRegistry>) -> Self {
        let snapshot = config.get_config();
        let allocator = Mutex::new(PortAllocator::new(&snapshot));

        let listener = snapshot.enable_broadcast.then(BroadcastListener::new);
        let announcer = snapshot
            .enable_broadcast
            .then(|| BroadcastAnnouncer::new(registry.clone()));

        let mut strategies: Vec<Arc<dyn DiscoveryStrategy>> = Vec::new();
        for kind in &snapshot.preferred_strategies {
            match kind {
                StrategyKind::WellKnownPort => {
                    strategies.push(Arc::new(WellKnownPortStrategy::new(
                        snapshot.default_ports.clone(),
                    )));
                }
                StrategyKind::Registry if snapshot.enable_registry => {
                    strategies.push(Arc::new(RegistryStrategy::new(registry.clone())));
                }
                StrategyKind::Dns if snapshot.enable_dns => {
                    strategies.push(Arc::new(DnsStrategy::new(snapshot.default_ports.clone())));
                }
                StrategyKind::Broadcast => {
                    if let Some(listener) = &listener {
                        strategies.push(Arc::new(BroadcastStrategy::new(listener.cache())));
                    }
                }
                _ => {
                    debug!("Strategy {:?} disabled by configuration", kind);
                }
            }
        }

        Self {
            config,
            registry,
            allocator,
            strategies,
            listener,
            announcer,
        }
    }

    /// Build a client with an explicit strategy chain (mainly for tests)
    pub fn with_strategies(
        config: Arc<ConfigManager>,
        registry: Arc<ServiceRegistry>,
        strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    ) -> Self {
        let snapshot = config.get_config();
        Self {
            config,
            registry,
            allocator: Mutex::new(PortAllocator::new(&snapshot)),
            strategies,
            listener: None,
            announcer: None,
        }
    }

    /// Start the broadcast listener and announcer, when enabled
    pub async fn start(&self) -> Result<()> {
        let snapshot = self.config.get_config();
        if let Some(listener) = &self.listener {
            listener.start(&snapshot.broadcast_address).await?;
        }
        if let Some(announcer) = &self.announcer {
            announcer
                .start(
                    &snapshot.broadcast_address,
                    snapshot.announcement_interval,
                    snapshot.broadcast_ttl,
                )
                .await?;
        }
        Ok(())
    }

    /// Stop broadcast participation
    pub async fn stop(&self) -> Result<()> {
        if let Some(announcer) = &self.announcer {
            let _ = announcer.stop().await;
        }
        if let Some(listener) = &self.listener {
            let _ = listener.stop().await;
        }
        Ok(())
    }

    /// Try each strategy in order, returning the first success
    pub async fn discover(&self, name: &str) -> Result<ResolvedService> {
        for strategy in &self.strategies {
            let started = Instant::now();
            match strategy.resolve(name).await {
                Ok((host, port)) => {
                    let resolved = ResolvedService {
                        name: name.to_string(),
                        host,
                        port,
                        strategy: strategy.kind(),
                        latency: started.elapsed(),
                    };
                    info!(
                        "Resolved '{}' to {}:{} via {:?} in {:?}",
                        name, resolved.host, resolved.port, resolved.strategy, resolved.latency
                    );
                    return Ok(resolved);
                }
                Err(e) => {
                    debug!("Strategy {:?} missed '{}': {}", strategy.kind(), name, e);
                }
            }
        }
        Err(Error::ResolutionFailed(name.to_string()))
    }

    /// [`DiscoveryClient::discover`] bounded by a deadline
    pub async fn discover_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ResolvedService> {
        match tokio::time::timeout(timeout, self.discover(name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DiscoveryTimeout {
                name: name.to_string(),
                timeout,
            }),
        }
    }

    /// Poll discovery until the service appears or the deadline passes
    pub async fn wait_for_service(&self, name: &str, max_wait: Duration) -> Result<ResolvedService> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Ok(resolved) = self.discover(name).await {
                return Ok(resolved);
            }
            if Instant::now() >= deadline {
                return Err(Error::DiscoveryTimeout {
                    name: name.to_string(),
                    timeout: max_wait,
                });
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Register a service, allocating a port when the request carries zero
    pub fn register(&self, mut info: ServiceInfo) -> Result<()> {
        if info.port == 0 {
            let port = self
                .allocator
                .lock()
                .unwrap()
                .allocate_port(&info.name, None)?;
            debug!("Auto-allocated port {} for '{}'", port, info.name);
            info.port = port;
        }
        self.registry.register(info)
    }

    /// Deregister a service and release any allocated port
    pub fn deregister(&self, name: &str) -> Result<ServiceInfo> {
        let removed = self.registry.deregister(name)?;
        self.allocator.lock().unwrap().release_service_port(name);
        Ok(removed)
    }

    /// Refresh a service's heartbeat
    pub fn heartbeat(&self, name: &str) -> Result<()> {
        self.registry.heartbeat(name)
    }
}
