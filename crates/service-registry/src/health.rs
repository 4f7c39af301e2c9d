//! Hysteresis-based health monitoring on top of the registry
//!
//! The registry's own health loop trusts each probe outcome directly.
//! This monitor adds flap suppression: a service only changes health
//! status after a configurable streak of consecutive probe results,
//! and chronically failing services can be evicted entirely.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{HealthCheckResult, Protocol, ServiceInfo};
use crate::probe::ServiceProber;
use crate::registry::ServiceRegistry;

/// A caller-supplied health check overriding the protocol probe
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Check one service; `Err` marks it unhealthy with the given reason
    async fn check(&self, service: &ServiceInfo) -> std::result::Result<(), String>;
}

/// Tuning knobs for the hysteresis monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between monitoring passes
    pub check_interval: Duration,

    /// Per-probe transport timeout
    pub probe_timeout: Duration,

    /// Consecutive failures before a healthy service flips unhealthy
    pub unhealthy_threshold: u32,

    /// Consecutive successes before an unhealthy service flips back
    pub healthy_threshold: u32,

    /// Deregister services whose failure streak reaches the removal threshold
    pub enable_auto_removal: bool,

    /// Failure streak that triggers auto-removal
    pub removal_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            enable_auto_removal: false,
            removal_threshold: 5,
        }
    }
}

/// Per-service streak counters and the latest probe outcome
#[derive(Default)]
struct ServiceHealthState {
    failure_count: u32,
    success_count: u32,
    last_result: Option<HealthCheckResult>,
}

/// Periodic health monitor with hysteresis and auto-removal
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthMonitorConfig,
    prober: Arc<ServiceProber>,
    states: Arc<RwLock<HashMap<String, ServiceHealthState>>>,
    custom_checks: Arc<RwLock<HashMap<String, Arc<dyn HealthCheck>>>>,
    strategy_overrides: Arc<RwLock<HashMap<String, Protocol>>>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor over a registry
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthMonitorConfig) -> Self {
        let prober = Arc::new(ServiceProber::new(config.probe_timeout));
        Self {
            registry,
            config,
            prober,
            states: Arc::new(RwLock::new(HashMap::new())),
            custom_checks: Arc::new(RwLock::new(HashMap::new())),
            strategy_overrides: Arc::new(RwLock::new(HashMap::new())),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Install a custom check for one service, overriding its protocol probe
    pub fn register_custom_check<C>(&self, service_name: &str, check: C)
    where
        C: HealthCheck + 'static,
    {
        self.custom_checks
            .write()
            .unwrap()
            .insert(service_name.to_string(), Arc::new(check));
    }

    /// Probe one service with a different protocol than it registered with
    pub fn set_service_strategy(&self, service_name: &str, strategy: Protocol) {
        self.strategy_overrides
            .write()
            .unwrap()
            .insert(service_name.to_string(), strategy);
    }

    /// Latest probe outcome recorded for a service
    pub fn last_result(&self, service_name: &str) -> Option<HealthCheckResult> {
        self.states
            .read()
            .unwrap()
            .get(service_name)
            .and_then(|s| s.last_result.clone())
    }

    /// Probe a single service now and apply the hysteresis rules
    pub async fn check_service_health(&self, service_name: &str) -> Result<HealthCheckResult> {
        let service = self.registry.get(service_name)?;
        let result = Self::evaluate(
            &service,
            &self.prober,
            &self.custom_checks,
            &self.strategy_overrides,
        )
        .await;
        Self::apply_result(&self.registry, &self.states, &self.config, &result);
        Ok(result)
    }

    /// Start the monitoring loop
    pub fn start(&self) -> Result<()> {
        let mut cancel_slot = self.cancel.lock().unwrap();
        if cancel_slot.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let registry = self.registry.clone();
        let prober = self.prober.clone();
        let states = self.states.clone();
        let custom_checks = self.custom_checks.clone();
        let strategy_overrides = self.strategy_overrides.clone();
        let config = self.config.clone();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(config.check_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = loop_cancel.cancelled() => {
                        debug!("Health monitor shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        for service in registry.list() {
                            let result = Self::evaluate(
                                &service,
                                &prober,
                                &custom_checks,
                                &strategy_overrides,
                            )
                            .await;
                            Self::apply_result(&registry, &states, &config, &result);
                        }
                    }
                }
            }
        });

        info!("Health monitor started");
        *cancel_slot = Some(cancel);
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the monitoring loop and wait for it to finish
    pub async fn stop(&self) -> Result<()> {
        let cancel = self
            .cancel
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::NotRunning)?;
        cancel.cancel();

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Health monitor loop ended abnormally: {}", e);
            }
        }

        info!("Health monitor stopped");
        Ok(())
    }

    /// Run the custom check when one is installed, else the protocol probe
    async fn evaluate(
        service: &ServiceInfo,
        prober: &Arc<ServiceProber>,
        custom_checks: &Arc<RwLock<HashMap<String, Arc<dyn HealthCheck>>>>,
        strategy_overrides: &Arc<RwLock<HashMap<String, Protocol>>>,
    ) -> HealthCheckResult {
        let custom = custom_checks.read().unwrap().get(&service.name).cloned();
        if let Some(check) = custom {
            let started = Instant::now();
            return match check.check(service).await {
                Ok(()) => HealthCheckResult::ok(&service.name, started.elapsed()),
                Err(reason) => {
                    HealthCheckResult::failed(&service.name, started.elapsed(), reason)
                }
            };
        }

        let strategy = strategy_overrides.read().unwrap().get(&service.name).copied();
        match strategy {
            Some(protocol) if protocol != service.protocol => {
                let mut probed = service.clone();
                probed.protocol = protocol;
                prober.probe(&probed).await
            }
            _ => prober.probe(service).await,
        }
    }

    /// Update streak counters and flip status only across thresholds
    fn apply_result(
        registry: &Arc<ServiceRegistry>,
        states: &Arc<RwLock<HashMap<String, ServiceHealthState>>>,
        config: &HealthMonitorConfig,
        result: &HealthCheckResult,
    ) {
        let name = result.service_name.as_str();
        let currently_healthy = match registry.get(name) {
            Ok(service) => service.healthy,
            // Raced with a deregistration; drop any stale state.
            Err(_) => {
                states.write().unwrap().remove(name);
                return;
            }
        };

        let mut states = states.write().unwrap();
        let state = states.entry(name.to_string()).or_default();
        state.last_result = Some(result.clone());

        if result.healthy {
            state.success_count += 1;
            state.failure_count = 0;

            if !currently_healthy && state.success_count >= config.healthy_threshold {
                info!("Service '{}' recovered after {} successes", name, state.success_count);
                state.success_count = 0;
                if let Err(e) = registry.update_health(name, true) {
                    warn!("Failed to mark '{}' healthy: {}", name, e);
                }
            }
        } else {
            state.failure_count += 1;
            state.success_count = 0;

            if currently_healthy && state.failure_count >= config.unhealthy_threshold {
                warn!(
                    "Service '{}' unhealthy after {} consecutive failures",
                    name, state.failure_count
                );
                // The failing streak keeps counting toward removal.
                if let Err(e) = registry.update_health(name, false) {
                    warn!("Failed to mark '{}' unhealthy: {}", name, e);
                }
            }

            if config.enable_auto_removal && state.failure_count >= config.removal_threshold {
                warn!(
                    "Auto-removing service '{}' after {} consecutive failures",
                    name, state.failure_count
                );
                states.remove(name);
                if let Err(e) = registry.deregister(name) {
                    warn!("Failed to auto-remove '{}': {}", name, e);
                }
            }
        }
    }
}
