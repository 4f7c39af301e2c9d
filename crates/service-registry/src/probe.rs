//! Protocol-aware health probes

use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::models::{HealthCheckResult, Protocol, ServiceInfo};

/// Runs protocol-specific health probes against service endpoints
///
/// Probe failures are reported in the returned [`HealthCheckResult`];
/// they never surface as errors to the caller.
pub struct ServiceProber {
    http: reqwest::Client,
    timeout: Duration,
}

impl ServiceProber {
    /// Create a prober with the given per-probe timeout
    ///
    /// TLS verification is disabled: internal services routinely present
    /// self-signed certificates.
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            // 3xx counts as healthy on its own; never chase the target
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP probe client");

        Self { http, timeout }
    }

    /// Probe a service according to its protocol
    pub async fn probe(&self, info: &ServiceInfo) -> HealthCheckResult {
        let started = Instant::now();

        let outcome = match info.protocol {
            Protocol::Http => self.probe_http(info, "http").await,
            Protocol::Https => self.probe_http(info, "https").await,
            Protocol::Grpc => self.probe_grpc(info).await,
            Protocol::Tcp => self.probe_tcp(info).await,
            Protocol::Udp => self.probe_udp(info).await,
        };

        let latency = started.elapsed();
        match outcome {
            Ok(()) => HealthCheckResult::ok(&info.name, latency),
            Err(reason) => {
                debug!("Probe failed for '{}': {}", info.name, reason);
                HealthCheckResult::failed(&info.name, latency, reason)
            }
        }
    }

    /// GET the health endpoint; 2xx and 3xx count as healthy
    async fn probe_http(
        &self,
        info: &ServiceInfo,
        scheme: &str,
    ) -> std::result::Result<(), String> {
        let url = format!(
            "{}://{}:{}{}",
            scheme,
            info.host,
            info.port,
            info.health_endpoint()
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET {}: {}", url, e))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(format!("GET {} returned {}", url, status))
        }
    }

    /// Standard gRPC Health.Check; healthy iff the response is SERVING
    async fn probe_grpc(&self, info: &ServiceInfo) -> std::result::Result<(), String> {
        use tonic_health::pb::health_check_response::ServingStatus;
        use tonic_health::pb::health_client::HealthClient;
        use tonic_health::pb::HealthCheckRequest;

        let endpoint = tonic::transport::Endpoint::from_shared(format!(
            "http://{}:{}",
            info.host, info.port
        ))
        .map_err(|e| format!("invalid gRPC endpoint: {}", e))?
        .connect_timeout(self.timeout)
        .timeout(self.timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| format!("gRPC connect: {}", e))?;

        let mut client = HealthClient::new(channel);
        let request = HealthCheckRequest {
            service: info.grpc_service_name().to_string(),
        };

        let response = client
            .check(request)
            .await
            .map_err(|status| format!("Health.Check: {}", status))?;

        let serving = response.into_inner().status;
        if serving == ServingStatus::Serving as i32 {
            Ok(())
        } else {
            Err(format!("serving status {}", serving))
        }
    }

    /// Successful dial within the timeout counts as healthy
    async fn probe_tcp(&self, info: &ServiceInfo) -> std::result::Result<(), String> {
        let address = info.address();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("dial {}: {}", address, e)),
            Err(_) => Err(format!("dial {}: timed out", address)),
        }
    }

    /// UDP is connectionless: a connected zero-byte send verifies the route
    async fn probe_udp(&self, info: &ServiceInfo) -> std::result::Result<(), String> {
        let address = info.address();
        let attempt = async {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| format!("bind probe socket: {}", e))?;
            socket
                .connect(&address)
                .await
                .map_err(|e| format!("connect {}: {}", address, e))?;
            socket
                .send(&[])
                .await
                .map_err(|e| format!("send {}: {}", address, e))?;
            Ok(())
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(format!("dial {}: timed out", address)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn prober() -> ServiceProber {
        ServiceProber::new(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_tcp_probe_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let info = ServiceInfo::new("echo", "127.0.0.1", port, Protocol::Tcp);
        let result = prober().probe(&info).await;

        assert!(result.healthy);
        assert!(result.error.is_none());
        assert_eq!(result.service_name, "echo");
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Bind then drop to find a port nothing is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let info = ServiceInfo::new("gone", "127.0.0.1", port, Protocol::Tcp);
        let result = prober().probe(&info).await;

        assert!(!result.healthy);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_udp_probe_route() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let info = ServiceInfo::new("dgram", "127.0.0.1", port, Protocol::Udp);
        let result = prober().probe(&info).await;

        assert!(result.healthy);
    }

    #[tokio::test]
    async fn test_http_probe_against_minimal_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let info = ServiceInfo::new("api", "127.0.0.1", port, Protocol::Http);
        let result = prober().probe(&info).await;

        assert!(result.healthy, "error: {:?}", result.error);
    }

    #[tokio::test]
    async fn test_http_probe_5xx_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let info = ServiceInfo::new("api", "127.0.0.1", port, Protocol::Http);
        let result = prober().probe(&info).await;

        assert!(!result.healthy);
    }
}
