// src/checker/transport.rs
// =============================================================================
// The two network capabilities the checker consumes.
//
// - HttpTransport: "GET this URL before this deadline, give me the status"
// - Resolver: "which IP addresses does this hostname have?"
//
// Neither one retries. Retry, backoff and circuit breaking all live in the
// checker (probe.rs) so the policy is the same whatever sits underneath.
//
// The production implementations use reqwest and tokio's resolver; tests
// plug in stubs that count calls and never leave the process.
// =============================================================================

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue one GET request and return the response status code.
    async fn get(&self, url: &Url, deadline: Instant) -> Result<u16, TransportError>;
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Forward lookup of `host`. An empty list is a valid answer.
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

// HTTP transport backed by a shared reqwest client
//
// One client is built up front and reused for every request so connections
// are pooled across the whole batch.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            // Redirects are not followed: a 3xx already counts as available,
            // and the target would skip the SSRF guard.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, deadline: Instant) -> Result<u16, TransportError> {
        let request = self.client.get(url.clone()).send();
        // Only the status line matters; the body is dropped unread.
        match tokio::time::timeout_at(deadline, request).await {
            Ok(Ok(response)) => Ok(response.status().as_u16()),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::DeadlineExceeded),
            Ok(Err(e)) => Err(TransportError::Request(e.to_string())),
            Err(_) => Err(TransportError::DeadlineExceeded),
        }
    }
}

/// Resolver backed by the system's getaddrinfo (through tokio).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        // The port is required by lookup_host but does not affect the answer
        let addrs = tokio::net::lookup_host((host, 443)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Stub transport
    //
    // Answers every request with a fixed status (or with a per-host status
    // when one is configured), counts calls per host, and tracks the highest
    // number of requests that were in flight at the same time.
    pub struct StubTransport {
        default_status: Option<u16>,
        per_host: HashMap<String, u16>,
        delay: Duration,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubTransport {
        /// Every request gets `status`.
        pub fn with_status(status: u16) -> Self {
            Self::build(Some(status))
        }

        /// Every request fails with a transport error.
        pub fn failing() -> Self {
            Self::build(None)
        }

        fn build(default_status: Option<u16>) -> Self {
            Self {
                default_status,
                per_host: HashMap::new(),
                delay: Duration::ZERO,
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn host_status(mut self, host: &str, status: u16) -> Self {
            self.per_host.insert(host.to_string(), status);
            self
        }

        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }

        pub fn calls_for(&self, host: &str) -> usize {
            self.calls.lock().unwrap().get(host).copied().unwrap_or(0)
        }

        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn get(&self, url: &Url, _deadline: Instant) -> Result<u16, TransportError> {
            let host = url.host_str().unwrap_or_default().to_string();
            *self.calls.lock().unwrap().entry(host.clone()).or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.per_host.get(&host).copied().or(self.default_status) {
                Some(status) => Ok(status),
                None => Err(TransportError::Request("connection refused".to_string())),
            }
        }
    }

    // Stub resolver
    //
    // Hosts without an entry resolve to a single public address, so tests
    // only need to list the hosts they want to behave differently.
    #[derive(Default)]
    pub struct StubResolver {
        answers: HashMap<String, Vec<IpAddr>>,
        failing: Vec<String>,
        delay: Duration,
    }

    impl StubResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn answer(mut self, host: &str, ips: &[&str]) -> Self {
            let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
            self.answers.insert(host.to_string(), ips);
            self
        }

        pub fn fail(mut self, host: &str) -> Self {
            self.failing.push(host.to_string());
            self
        }

        /// Every lookup takes `delay` before answering.
        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Resolver for StubResolver {
        async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.iter().any(|h| h == host) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such host",
                ));
            }
            Ok(self
                .answers
                .get(host)
                .cloned()
                .unwrap_or_else(|| vec!["93.184.216.34".parse().unwrap()]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Answers the first request with a redirect back to itself and every
    // later one with 200, counting connections.
    async fn redirecting_server() -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let hit = counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let response = if hit == 0 {
                    format!(
                        "HTTP/1.1 302 Found\r\nLocation: http://{}/next\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        addr
                    )
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        (url, hits)
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let (url, hits) = redirecting_server().await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let status = transport.get(&url, deadline).await.unwrap();
        assert_eq!(status, 302);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
