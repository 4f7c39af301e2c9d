//! UDP multicast announcement and listening
//!
//! Announcements are JSON-serialized [`ServiceInfo`] records sent to a
//! configured multicast group. The listener keeps the latest record per
//! service name; the broadcast discovery strategy reads that cache.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::ServiceInfo;
use crate::registry::ServiceRegistry;

/// Shared cache of services heard over multicast
pub type AnnouncementCache = Arc<RwLock<HashMap<String, ServiceInfo>>>;

/// Listens on the multicast group and caches announcements
pub struct BroadcastListener {
    cache: AnnouncementCache,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastListener {
    /// Create a listener with an empty cache
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Handle to the announcement cache
    pub fn cache(&self) -> AnnouncementCache {
        self.cache.clone()
    }

    /// Bind the group address and start caching announcements
    pub async fn start(&self, group_address: &str) -> Result<()> {
        if self.cancel.lock().unwrap().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let addr: SocketAddr = group_address
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("broadcast address: {}", e)))?;

        let socket = UdpSocket::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            addr.port(),
        ))
        .await?;

        if let IpAddr::V4(group) = addr.ip() {
            if group.is_multicast() {
                socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            }
        }

        let cache = self.cache.clone();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    () = loop_cancel.cancelled() => {
                        debug!("Broadcast listener shutting down");
                        return;
                    }
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, peer)) => {
                                match serde_json::from_slice::<ServiceInfo>(&buf[..len]) {
                                    Ok(announced) if announced.validate().is_ok() => {
                                        debug!(
                                            "Heard announcement for '{}' from {}",
                                            announced.name, peer
                                        );
                                        cache
                                            .write()
                                            .unwrap()
                                            .insert(announced.name.clone(), announced);
                                    }
                                    Ok(announced) => {
                                        debug!("Ignoring malformed announcement for '{}'", announced.name);
                                    }
                                    Err(e) => {
                                        debug!("Undecodable announcement from {}: {}", peer, e);
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Broadcast receive error: {}", e);
                            }
                        }
                    }
                }
            }
        });

        info!("Broadcast listener started on {}", group_address);
        *self.cancel.lock().unwrap() = Some(cancel);
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the receive loop
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
            let _ = handle.await;
        }
        Ok(())
    }
}

impl Default for BroadcastListener {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically announces local registry services to the multicast group
pub struct BroadcastAnnouncer {
    registry: Arc<ServiceRegistry>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastAnnouncer {
    /// Create an announcer for a registry
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Start announcing every `interval` with the given packet TTL
    pub async fn start(&self, group_address: &str, interval: Duration, ttl: u32) -> Result<()> {
        if self.cancel.lock().unwrap().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let addr: SocketAddr = group_address
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("broadcast address: {}", e)))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_multicast_ttl_v4(ttl)?;

        let registry = self.registry.clone();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = loop_cancel.cancelled() => {
                        debug!("Broadcast announcer shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        for service in registry.list() {
                            match serde_json::to_vec(&service) {
                                Ok(packet) => {
                                    if let Err(e) = socket.send_to(&packet, addr).await {
                                        warn!("Failed to announce '{}': {}", service.name, e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to encode announcement for '{}': {}", service.name, e);
                                }
                            }
                        }
                    }
                }
            }
        });

        info!("Broadcast announcer started toward {}", group_address);
        *self.cancel.lock().unwrap() = Some(cancel);
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the announcement loop
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
            let _ = handle.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    #[tokio::test]
    async fn test_listener_caches_announcements() {
        let listener = BroadcastListener::new();
        // Plain loopback unicast exercises the same receive path as multicast
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = {
            // Find the port the listener bound by starting on an OS-chosen one
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = socket.local_addr().unwrap().port();
            drop(socket);
            port
        };
        listener.start(&format!("127.0.0.1:{}", port)).await.unwrap();

        let info = ServiceInfo::new("announced", "10.0.0.9", 7070, Protocol::Tcp);
        let packet = serde_json::to_vec(&info).unwrap();
        probe
            .send_to(&packet, format!("127.0.0.1:{}", port))
            .await
            .unwrap();

        // Give the receive loop a moment
        for _ in 0..50 {
            if listener.cache().read().unwrap().contains_key("announced") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let cached = listener.cache();
        let cached = cached.read().unwrap();
        let entry = cached.get("announced").expect("announcement not cached");
        assert_eq!(entry.host, "10.0.0.9");
        assert_eq!(entry.port, 7070);
        drop(cached);

        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_ignores_garbage() {
        let listener = BroadcastListener::new();
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        drop(socket);
        listener.start(&format!("127.0.0.1:{}", port)).await.unwrap();

        probe
            .send_to(b"not json at all", format!("127.0.0.1:{}", port))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(listener.cache().read().unwrap().is_empty());
        listener.stop().await.unwrap();
    }
}
