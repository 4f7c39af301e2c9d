//! Core service registry implementation

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::models::{Protocol, ServiceInfo};
use crate::probe::ServiceProber;

/// Service registry with TTL-based records and protocol-aware probing
///
/// The registry exclusively owns its [`ServiceInfo`] records; every
/// accessor returns a copy. Two background loops run between
/// [`ServiceRegistry::start`] and [`ServiceRegistry::stop`]: a cleanup
/// loop evicting expired records and a health-check loop probing each
/// service by protocol.
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, ServiceInfo>>>,
    config: Arc<ConfigManager>,
    prober: Arc<ServiceProber>,
    cancel: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceRegistry {
    /// Create a registry bound to a configuration manager
    pub fn new(config: Arc<ConfigManager>) -> Self {
        let timeout = config.get_config().health_check_timeout;
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
            config,
            prober: Arc::new(ServiceProber::new(timeout)),
            cancel: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Create a registry with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(ConfigManager::with_defaults()))
    }

    /// Register a new service
    ///
    /// Stamps registration and heartbeat timestamps, marks the record
    /// healthy, and fills a zero TTL from the configured default.
    pub fn register(&self, mut info: ServiceInfo) -> Result<()> {
        info.validate()?;

        let config = self.config.get_config();
        let mut services = self.services.write().unwrap();

        if services.contains_key(&info.name) {
            return Err(Error::ServiceExists(info.name));
        }
        if services.len() >= config.max_services {
            return Err(Error::MaxServicesReached(config.max_services));
        }

        let now = Utc::now();
        info.registered_at = now;
        info.last_heartbeat = now;
        info.healthy = true;
        if info.ttl.is_zero() {
            info.ttl = config.default_ttl;
        }

        info!("Registering service: {} v{}", info.name, info.version);
        services.insert(info.name.clone(), info);
        Ok(())
    }

    /// Remove a service
    pub fn deregister(&self, name: &str) -> Result<ServiceInfo> {
        let mut services = self.services.write().unwrap();
        let removed = services
            .remove(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        info!("Deregistered service: {}", name);
        Ok(removed)
    }

    /// Replace a service's mutable fields
    ///
    /// The record's name, registration time and heartbeat are preserved.
    pub fn update(&self, name: &str, mut info: ServiceInfo) -> Result<()> {
        info.name = name.to_string();
        info.validate()?;

        let mut services = self.services.write().unwrap();
        let existing = services
            .get_mut(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

        info.registered_at = existing.registered_at;
        info.last_heartbeat = existing.last_heartbeat;
        if info.ttl.is_zero() {
            info.ttl = existing.ttl;
        }

        debug!("Updated service: {}", name);
        *existing = info;
        Ok(())
    }

    /// Refresh a service's heartbeat timestamp
    pub fn heartbeat(&self, name: &str) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let existing = services
            .get_mut(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        existing.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Overwrite a service's health flag
    pub fn update_health(&self, name: &str, healthy: bool) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let existing = services
            .get_mut(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        if existing.healthy != healthy {
            info!(
                "Service '{}' health: {} -> {}",
                name, existing.healthy, healthy
            );
        }
        existing.healthy = healthy;
        Ok(())
    }

    /// Get a service record by name, as a defensive copy
    pub fn get(&self, name: &str) -> Result<ServiceInfo> {
        self.services
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Snapshot of all registered services
    pub fn list(&self) -> Vec<ServiceInfo> {
        self.services.read().unwrap().values().cloned().collect()
    }

    /// Snapshot of services speaking a given protocol
    pub fn list_by_protocol(&self, protocol: Protocol) -> Vec<ServiceInfo> {
        self.services
            .read()
            .unwrap()
            .values()
            .filter(|s| s.protocol == protocol)
            .cloned()
            .collect()
    }

    /// Snapshot of services that are healthy and not expired
    pub fn list_healthy(&self) -> Vec<ServiceInfo> {
        let now = Utc::now();
        self.services
            .read()
            .unwrap()
            .values()
            .filter(|s| s.healthy && !s.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.read().unwrap().len()
    }

    /// Whether the registry holds no services
    pub fn is_empty(&self) -> bool {
        self.services.read().unwrap().is_empty()
    }

    /// Evict every expired record now, returning the evicted names
    pub fn evict_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut services = self.services.write().unwrap();
        let expired: Vec<String> = services
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.name.clone())
            .collect();

        for name in &expired {
            services.remove(name);
            info!("Evicted expired service: {}", name);
        }
        expired
    }

    /// Start the cleanup and health-check loops
    pub fn start(&self) -> Result<()> {
        let mut cancel_slot = self.cancel.lock().unwrap();
        if cancel_slot.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let config = self.config.get_config();
        let mut handles = self.handles.lock().unwrap();

        handles.push(Self::spawn_cleanup_loop(
            self.services.clone(),
            config.cleanup_interval,
            cancel.clone(),
        ));

        if config.enable_health_check {
            handles.push(Self::spawn_health_loop(
                self.services.clone(),
                self.prober.clone(),
                config.health_check_interval,
                cancel.clone(),
            ));
        }

        info!("Service registry started");
        *cancel_slot = Some(cancel);
        Ok(())
    }

    /// Signal the background loops and wait for them to finish
    pub async fn stop(&self) -> Result<()> {
        let cancel = self
            .cancel
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::NotRunning)?;
        cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Registry loop ended abnormally: {}", e);
            }
        }

        info!("Service registry stopped");
        Ok(())
    }

    fn spawn_cleanup_loop(
        services: Arc<RwLock<HashMap<String, ServiceInfo>>>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Cleanup loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        let now = Utc::now();
                        let mut map = services.write().unwrap();
                        let before = map.len();
                        map.retain(|name, s| {
                            let keep = !s.is_expired_at(now);
                            if !keep {
                                info!("Evicted expired service: {}", name);
                            }
                            keep
                        });
                        let evicted = before - map.len();
                        if evicted > 0 {
                            debug!("Cleanup pass evicted {} services", evicted);
                        }
                    }
                }
            }
        })
    }

    fn spawn_health_loop(
        services: Arc<RwLock<HashMap<String, ServiceInfo>>>,
        prober: Arc<ServiceProber>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Health-check loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        Self::run_health_pass(&services, &prober).await;
                    }
                }
            }
        })
    }

    /// One pass over every service: staleness short-circuit, then probe
    async fn run_health_pass(
        services: &Arc<RwLock<HashMap<String, ServiceInfo>>>,
        prober: &Arc<ServiceProber>,
    ) {
        let snapshot: Vec<ServiceInfo> = services.read().unwrap().values().cloned().collect();
        let now = Utc::now();

        let verdicts = futures::future::join_all(snapshot.iter().map(|service| {
            let prober = prober.clone();
            async move {
                // A heartbeat older than half the TTL is stale enough to
                // distrust without spending a probe.
                if !service.ttl.is_zero() {
                    let elapsed = now
                        .signed_duration_since(service.last_heartbeat)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if elapsed > service.ttl / 2 {
                        debug!("Service '{}' heartbeat is stale", service.name);
                        return (service.name.clone(), false);
                    }
                }

                let result = prober.probe(service).await;
                (service.name.clone(), result.healthy)
            }
        }))
        .await;

        let mut map = services.write().unwrap();
        for (name, healthy) in verdicts {
            if let Some(service) = map.get_mut(&name) {
                if service.healthy != healthy {
                    info!("Service '{}' health: {} -> {}", name, service.healthy, healthy);
                }
                service.healthy = healthy;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::with_defaults()
    }

    fn info(name: &str, port: u16) -> ServiceInfo {
        ServiceInfo::new(name, "127.0.0.1", port, Protocol::Tcp)
    }

    #[test]
    fn test_register_and_get() {
        let registry = registry();
        registry.register(info("cache", 6379)).unwrap();

        let fetched = registry.get("cache").unwrap();
        assert_eq!(fetched.name, "cache");
        assert!(fetched.healthy);
        // Zero TTL was filled from config
        assert_eq!(fetched.ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = registry();
        registry.register(info("cache", 6379)).unwrap();
        assert!(matches!(
            registry.register(info("cache", 6380)),
            Err(Error::ServiceExists(_))
        ));
    }

    #[test]
    fn test_register_invalid_fails() {
        let registry = registry();
        assert!(matches!(
            registry.register(info("", 6379)),
            Err(Error::InvalidServiceInfo(_))
        ));
        assert!(matches!(
            registry.register(info("cache", 0)),
            Err(Error::InvalidServiceInfo(_))
        ));
    }

    #[test]
    fn test_max_services_enforced() {
        let config = ConfigManager::with_defaults();
        config.update_partial(|c| c.max_services = 1).unwrap();
        let registry = ServiceRegistry::new(Arc::new(config));

        registry.register(info("first", 7000)).unwrap();
        assert!(matches!(
            registry.register(info("second", 7001)),
            Err(Error::MaxServicesReached(1))
        ));
    }

    #[test]
    fn test_operations_on_missing_service() {
        let registry = registry();
        assert!(matches!(registry.get("ghost"), Err(Error::ServiceNotFound(_))));
        assert!(registry.heartbeat("ghost").is_err());
        assert!(registry.update_health("ghost", true).is_err());
        assert!(registry.deregister("ghost").is_err());
        assert!(registry.update("ghost", info("ghost", 1)).is_err());
    }

    #[test]
    fn test_update_preserves_identity_fields() {
        let registry = registry();
        registry.register(info("api", 8080)).unwrap();
        let original = registry.get("api").unwrap();

        let replacement = info("renamed", 8081).with_version("2.0.0");
        registry.update("api", replacement).unwrap();

        let updated = registry.get("api").unwrap();
        assert_eq!(updated.name, "api");
        assert_eq!(updated.port, 8081);
        assert_eq!(updated.version, "2.0.0");
        assert_eq!(updated.registered_at, original.registered_at);
    }

    #[test]
    fn test_heartbeat_refreshes() {
        let registry = registry();
        registry.register(info("api", 8080)).unwrap();
        let before = registry.get("api").unwrap().last_heartbeat;

        registry.heartbeat("api").unwrap();
        let after = registry.get("api").unwrap().last_heartbeat;
        assert!(after >= before);
    }

    #[test]
    fn test_list_filters() {
        let registry = registry();
        registry.register(info("cache", 6379)).unwrap();
        registry
            .register(ServiceInfo::new("api", "127.0.0.1", 8080, Protocol::Http))
            .unwrap();

        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.list_by_protocol(Protocol::Http).len(), 1);

        registry.update_health("cache", false).unwrap();
        let healthy = registry.list_healthy();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].name, "api");
    }

    #[test]
    fn test_list_healthy_excludes_expired() {
        let registry = registry();
        registry
            .register(info("cache", 6379).with_ttl(Duration::from_secs(10)))
            .unwrap();

        // Backdate the heartbeat past the TTL
        {
            let mut services = registry.services.write().unwrap();
            services.get_mut("cache").unwrap().last_heartbeat =
                Utc::now() - chrono::Duration::seconds(11);
        }

        assert!(registry.list_healthy().is_empty());
        assert_eq!(registry.evict_expired(), vec!["cache".to_string()]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let registry = registry();
        registry.start().unwrap();
        assert!(matches!(registry.start(), Err(Error::AlreadyRunning)));

        registry.stop().await.unwrap();
        assert!(matches!(registry.stop().await, Err(Error::NotRunning)));

        // Can be started again after a stop
        registry.start().unwrap();
        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_pass_flags_unreachable_service() {
        let registry = registry();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        registry.register(info("live", port)).unwrap();
        // Nothing listens on port 1 on loopback in the test environment
        registry.register(info("dead", 1)).unwrap();

        ServiceRegistry::run_health_pass(&registry.services, &registry.prober).await;

        assert!(registry.get("live").unwrap().healthy);
        assert!(!registry.get("dead").unwrap().healthy);
    }

    #[tokio::test]
    async fn test_health_pass_marks_stale_heartbeat() {
        let registry = registry();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        registry
            .register(info("stale", port).with_ttl(Duration::from_secs(20)))
            .unwrap();

        // Heartbeat older than TTL/2 distrusts the record without probing,
        // even though the endpoint itself is reachable.
        {
            let mut services = registry.services.write().unwrap();
            services.get_mut("stale").unwrap().last_heartbeat =
                Utc::now() - chrono::Duration::seconds(11);
        }

        ServiceRegistry::run_health_pass(&registry.services, &registry.prober).await;
        assert!(!registry.get("stale").unwrap().healthy);
    }
}
