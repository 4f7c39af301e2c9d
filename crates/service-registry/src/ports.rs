//! Port allocation for service classes

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::models::PortRange;

/// Hands out non-conflicting TCP ports per service class
///
/// Uniqueness is guaranteed across live allocations within a single
/// process; allocations do not survive a restart. A best-effort bind
/// probe filters out ports the OS already holds.
pub struct PortAllocator {
    /// Port ranges by service class
    ranges: HashMap<String, PortRange>,

    /// Ports excluded from allocation
    reserved: HashSet<u16>,

    /// Ephemeral fallback window, when enabled
    ephemeral: Option<PortRange>,

    /// Allocated ports by service name
    allocations: HashMap<String, u16>,

    /// Reverse mapping of port to service
    port_to_service: HashMap<u16, String>,
}

impl PortAllocator {
    /// Create an allocator from the discovery configuration
    pub fn new(config: &DiscoveryConfig) -> Self {
        let ephemeral = config.allow_ephemeral.then(|| PortRange {
            start: config.ephemeral_start,
            end: config.ephemeral_end,
        });

        Self {
            ranges: config.port_ranges.clone(),
            reserved: config.reserved_ports.iter().copied().collect(),
            ephemeral,
            allocations: HashMap::new(),
            port_to_service: HashMap::new(),
        }
    }

    /// Allocate a port for a service, honoring a preferred port when possible
    ///
    /// Returns the existing allocation when the service already holds one.
    /// The preferred port is used when it is unreserved and free; otherwise
    /// the lowest free port in the service's class range wins, then the
    /// ephemeral window when enabled.
    pub fn allocate_port(&mut self, service_name: &str, preferred: Option<u16>) -> Result<u16> {
        if let Some(&port) = self.allocations.get(service_name) {
            return Ok(port);
        }

        if let Some(port) = preferred {
            if port > 0 && self.is_available(port) {
                self.record(service_name, port);
                return Ok(port);
            }
            debug!(
                "Preferred port {} unavailable for '{}', scanning class range",
                port, service_name
            );
        }

        if let Some(range) = self.class_range(service_name) {
            if let Some(port) = self.lowest_available(range) {
                self.record(service_name, port);
                return Ok(port);
            }
        }

        if let Some(window) = self.ephemeral {
            if let Some(port) = self.lowest_available(window) {
                debug!(
                    "Class range exhausted for '{}', using ephemeral port {}",
                    service_name, port
                );
                self.record(service_name, port);
                return Ok(port);
            }
        }

        Err(Error::NoAvailablePort(service_name.to_string()))
    }

    /// Release the port held by a service
    pub fn release_service_port(&mut self, service_name: &str) -> Option<u16> {
        if let Some(port) = self.allocations.remove(service_name) {
            self.port_to_service.remove(&port);
            debug!("Released port {} from '{}'", port, service_name);
            Some(port)
        } else {
            None
        }
    }

    /// Port currently held by a service
    pub fn get_allocation(&self, service_name: &str) -> Option<u16> {
        self.allocations.get(service_name).copied()
    }

    /// Service holding a port
    pub fn get_service_by_port(&self, port: u16) -> Option<&str> {
        self.port_to_service.get(&port).map(|s| s.as_str())
    }

    /// Number of live allocations
    pub fn allocated_count(&self) -> usize {
        self.allocations.len()
    }

    /// Resolve the port range for a service's class
    ///
    /// The class is the longest configured class name contained in the
    /// service name (`"api-gateway"` matches class `"api"` when present).
    fn class_range(&self, service_name: &str) -> Option<PortRange> {
        if let Some(range) = self.ranges.get(service_name) {
            return Some(*range);
        }

        self.ranges
            .iter()
            .filter(|(class, _)| service_name.contains(class.as_str()))
            .max_by_key(|(class, _)| class.len())
            .map(|(_, range)| *range)
    }

    fn lowest_available(&self, range: PortRange) -> Option<u16> {
        range.iter().find(|&port| self.is_available(port))
    }

    fn is_available(&self, port: u16) -> bool {
        !self.reserved.contains(&port)
            && !self.port_to_service.contains_key(&port)
            && Self::os_can_bind(port)
    }

    /// Best-effort check that the OS is not already holding the port
    fn os_can_bind(port: u16) -> bool {
        TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
    }

    fn record(&mut self, service_name: &str, port: u16) {
        self.allocations.insert(service_name.to_string(), port);
        self.port_to_service.insert(port, service_name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiscoveryConfig {
        let mut config = DiscoveryConfig::default();
        config.port_ranges.clear();
        config
            .port_ranges
            .insert("worker".to_string(), PortRange { start: 19700, end: 19704 });
        config.reserved_ports = vec![19701];
        config.allow_ephemeral = false;
        config
    }

    #[test]
    fn test_preferred_port_honored() {
        let mut allocator = PortAllocator::new(&test_config());

        let port = allocator.allocate_port("worker-a", Some(19703)).unwrap();
        assert_eq!(port, 19703);
        assert_eq!(allocator.get_service_by_port(19703), Some("worker-a"));
    }

    #[test]
    fn test_lowest_free_port_in_class() {
        let mut allocator = PortAllocator::new(&test_config());

        // 19701 is reserved, so the scan skips it
        let first = allocator.allocate_port("worker-a", None).unwrap();
        let second = allocator.allocate_port("worker-b", None).unwrap();
        assert_eq!(first, 19700);
        assert_eq!(second, 19702);
    }

    #[test]
    fn test_reallocation_is_idempotent() {
        let mut allocator = PortAllocator::new(&test_config());

        let port = allocator.allocate_port("worker-a", None).unwrap();
        let again = allocator.allocate_port("worker-a", Some(19704)).unwrap();
        assert_eq!(port, again);
        assert_eq!(allocator.allocated_count(), 1);
    }

    #[test]
    fn test_exhaustion_without_ephemeral() {
        let mut config = test_config();
        config
            .port_ranges
            .insert("worker".to_string(), PortRange { start: 19710, end: 19711 });
        let mut allocator = PortAllocator::new(&config);

        allocator.allocate_port("worker-a", None).unwrap();
        allocator.allocate_port("worker-b", None).unwrap();
        let result = allocator.allocate_port("worker-c", None);
        assert!(matches!(result, Err(Error::NoAvailablePort(_))));
    }

    #[test]
    fn test_ephemeral_fallback() {
        let mut config = test_config();
        config
            .port_ranges
            .insert("worker".to_string(), PortRange { start: 19720, end: 19720 });
        config.allow_ephemeral = true;
        config.ephemeral_start = 19730;
        config.ephemeral_end = 19739;
        let mut allocator = PortAllocator::new(&config);

        allocator.allocate_port("worker-a", None).unwrap();
        let overflow = allocator.allocate_port("worker-b", None).unwrap();
        assert!((19730..=19739).contains(&overflow));
    }

    #[test]
    fn test_release_makes_port_reusable() {
        let mut allocator = PortAllocator::new(&test_config());

        let port = allocator.allocate_port("worker-a", None).unwrap();
        assert_eq!(allocator.release_service_port("worker-a"), Some(port));
        assert_eq!(allocator.allocated_count(), 0);

        let reused = allocator.allocate_port("worker-b", None).unwrap();
        assert_eq!(reused, port);
    }

    #[test]
    fn test_unknown_class_falls_to_ephemeral() {
        let mut config = test_config();
        config.allow_ephemeral = true;
        config.ephemeral_start = 19740;
        config.ephemeral_end = 19749;
        let mut allocator = PortAllocator::new(&config);

        // "database" matches no configured class
        let port = allocator.allocate_port("database", None).unwrap();
        assert!((19740..=19749).contains(&port));
    }
}
