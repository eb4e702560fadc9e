// src/checker/probe.rs
// =============================================================================
// Checks one link and decides Available / NotAvailable.
//
// The path a link takes:
//
//   validate -> normalize -> parse -> SSRF guard -> breaker gate -> retry loop
//
// The SSRF lookup is bounded by the same deadline as the requests.
//
// Every early exit returns NotAvailable without touching the network. Only
// the retry loop talks to the transport, and only the retry loop records
// breaker successes and failures.
//
// Retry loop:
// - up to 3 attempts
// - wait 100ms, then 300ms between attempts (the delay list has one more
//   entry than ever gets used, there is no wait after the last attempt)
// - 2xx/3xx -> Available right away
// - other status or transport error -> breaker failure, try again
// - the shared deadline stops everything: an expired deadline ends the loop
//   after a transport error and interrupts a pending backoff wait
// =============================================================================

use super::breaker::CircuitBreaker;
use super::guard::{parse_candidate, SsrfGuard};
use super::transport::{HttpTransport, Resolver};
use crate::clock::{Clock, SystemClock};
use crate::domain::LinkStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(300),
    Duration::from_millis(900),
];

pub struct Checker {
    transport: Arc<dyn HttpTransport>,
    guard: SsrfGuard,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    backoffs: Vec<Duration>,
}

impl Checker {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        resolver: Arc<dyn Resolver>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            transport,
            guard: SsrfGuard::new(resolver),
            breaker,
            clock: Arc::new(SystemClock),
            backoffs: DEFAULT_BACKOFFS.to_vec(),
        }
    }

    /// Replace the clock used for backoff waits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Check one link against the shared `deadline`.
    pub async fn check(&self, link: &str, deadline: Instant) -> LinkStatus {
        let Some(url) = parse_candidate(link) else {
            debug!(link, "rejected malformed link");
            return LinkStatus::NotAvailable;
        };
        let host = url.host_str().unwrap_or_default().to_string();

        match tokio::time::timeout_at(deadline, self.guard.is_blocked(&url)).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(host = %host, "blocked private host");
                return LinkStatus::NotAvailable;
            }
            // An unfinished lookup counts as blocked; the host saw no request,
            // so the breaker is left alone.
            Err(_elapsed) => {
                debug!(host = %host, "host lookup outlived the deadline");
                return LinkStatus::NotAvailable;
            }
        }
        if !self.breaker.allow(&host) {
            debug!(host = %host, "circuit open, skipping");
            return LinkStatus::NotAvailable;
        }

        let attempts = self.backoffs.len();
        for (attempt, backoff) in self.backoffs.iter().enumerate() {
            if Instant::now() >= deadline {
                return LinkStatus::NotAvailable;
            }
            // Bound the call here as well, so a transport that ignores the
            // deadline still cannot hold the batch past it.
            let outcome =
                tokio::time::timeout_at(deadline, self.transport.get(&url, deadline)).await;

            match outcome {
                Ok(Ok(status)) if (200..400).contains(&status) => {
                    self.breaker.success(&host);
                    return LinkStatus::Available;
                }
                Ok(Ok(status)) => {
                    debug!(host = %host, status, attempt = attempt + 1, "unexpected status");
                    self.breaker.failure(&host);
                }
                Ok(Err(e)) => {
                    debug!(host = %host, error = %e, attempt = attempt + 1, "request failed");
                    self.breaker.failure(&host);
                    if Instant::now() >= deadline {
                        return LinkStatus::NotAvailable;
                    }
                }
                Err(_elapsed) => {
                    self.breaker.failure(&host);
                    return LinkStatus::NotAvailable;
                }
            }

            if attempt + 1 < attempts && !self.wait(*backoff, deadline).await {
                return LinkStatus::NotAvailable;
            }
        }

        LinkStatus::NotAvailable
    }

    // Wait out one backoff step; false if the deadline fired first
    async fn wait(&self, backoff: Duration, deadline: Instant) -> bool {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::select! {
            _ = self.clock.sleep(backoff) => true,
            _ = tokio::time::sleep_until(deadline) => false,
        }
    }
}
