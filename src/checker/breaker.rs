// src/checker/breaker.rs
// =============================================================================
// Per-host circuit breaker.
//
// There is no explicit state enum; the state falls out of two numbers kept
// per host:
//
//   Closed  failures < threshold                      -> requests allowed
//   Open    failures >= threshold, cooldown running   -> requests denied
//   (reset) failures >= threshold, cooldown elapsed   -> counters cleared,
//                                                        request allowed
//
// A success clears the host immediately. The empty host is never tracked:
// allow("") is always true and recording against it does nothing.
//
// All hosts share one mutex. Every operation is a single HashMap lookup, so
// contention stays low even with many hosts.
// =============================================================================

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct HostCircuit {
    failures: u32,
    last_failure: Instant,
}

pub struct CircuitBreaker {
    hosts: Mutex<HashMap<String, HostCircuit>>,
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// A zero threshold or cooldown falls back to the defaults (3, 30s).
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self::with_clock(threshold, cooldown, Arc::new(SystemClock))
    }

    pub fn with_clock(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        let threshold = if threshold == 0 { DEFAULT_THRESHOLD } else { threshold };
        let cooldown = if cooldown.is_zero() { DEFAULT_COOLDOWN } else { cooldown };
        Self {
            hosts: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
            clock,
        }
    }

    /// Whether a request to `host` may go out right now.
    ///
    /// Denial does not touch the counters.
    pub fn allow(&self, host: &str) -> bool {
        if host.is_empty() {
            return true;
        }
        let mut hosts = self.lock();

        let Some(circuit) = hosts.get(host).copied() else {
            return true;
        };
        if circuit.failures < self.threshold {
            return true;
        }

        let since_failure = self.clock.now().saturating_duration_since(circuit.last_failure);
        if since_failure >= self.cooldown {
            debug!(host, "circuit cooldown elapsed, resetting");
            hosts.remove(host);
            return true;
        }
        false
    }

    pub fn success(&self, host: &str) {
        if host.is_empty() {
            return;
        }
        self.lock().remove(host);
    }

    pub fn failure(&self, host: &str) {
        if host.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut hosts = self.lock();
        let circuit = hosts.entry(host.to_string()).or_insert(HostCircuit {
            failures: 0,
            last_failure: now,
        });
        circuit.failures = circuit.failures.saturating_add(1);
        circuit.last_failure = now;

        if circuit.failures == self.threshold {
            warn!(host, failures = circuit.failures, "circuit opened");
        }
    }

    /// Recorded failures for `host` (0 when the host is unknown or was reset).
    pub fn failure_count(&self, host: &str) -> u32 {
        self.lock().get(host).map(|c| c.failures).unwrap_or(0)
    }

    // A panic while holding the lock cannot leave a HostCircuit half-written,
    // so a poisoned map is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, HostCircuit>> {
        self.hosts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;

    fn breaker(threshold: u32, cooldown: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::with_clock(threshold, cooldown, clock.clone());
        (breaker, clock)
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));
        let host = "example.com";

        assert!(cb.allow(host));
        cb.failure(host);
        cb.failure(host);
        assert!(cb.allow(host), "still closed below the threshold");

        cb.failure(host);
        assert!(!cb.allow(host));
        assert_eq!(cb.failure_count(host), 3);
    }

    #[test]
    fn test_denial_does_not_change_counters() {
        let (cb, _clock) = breaker(2, Duration::from_secs(30));
        cb.failure("a.com");
        cb.failure("a.com");

        assert!(!cb.allow("a.com"));
        assert!(!cb.allow("a.com"));
        assert_eq!(cb.failure_count("a.com"), 2);
    }

    #[test]
    fn test_cooldown_resets_counters() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));
        cb.failure("cooldown.test");
        assert!(!cb.allow("cooldown.test"));

        clock.advance(Duration::from_secs(29));
        assert!(!cb.allow("cooldown.test"));

        clock.advance(Duration::from_secs(1));
        assert!(cb.allow("cooldown.test"));
        assert_eq!(cb.failure_count("cooldown.test"), 0);
    }

    #[test]
    fn test_success_resets_regardless_of_cooldown() {
        let (cb, _clock) = breaker(2, Duration::from_secs(3600));
        cb.failure("flaky.io");
        cb.failure("flaky.io");
        assert!(!cb.allow("flaky.io"));

        cb.success("flaky.io");
        assert!(cb.allow("flaky.io"));
        assert_eq!(cb.failure_count("flaky.io"), 0);
    }

    #[test]
    fn test_hosts_are_independent() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));
        cb.failure("down.com");
        assert!(!cb.allow("down.com"));
        assert!(cb.allow("up.com"));
    }

    #[test]
    fn test_empty_host_is_a_no_op() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));
        cb.failure("");
        cb.failure("");
        assert!(cb.allow(""));
        assert_eq!(cb.failure_count(""), 0);
        cb.success("");
    }

    #[test]
    fn test_zero_settings_fall_back_to_defaults() {
        let (cb, _clock) = breaker(0, Duration::ZERO);
        cb.failure("x.com");
        cb.failure("x.com");
        assert!(cb.allow("x.com"));
        cb.failure("x.com");
        assert!(!cb.allow("x.com"));
    }

    #[test]
    fn test_concurrent_hosts() {
        let cb = Arc::new(CircuitBreaker::new(1000, Duration::from_secs(30)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    let host = format!("host-{}.com", i % 4);
                    for _ in 0..100 {
                        cb.failure(&host);
                        cb.allow(&host);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4 {
            assert_eq!(cb.failure_count(&format!("host-{}.com", i)), 200);
        }
    }
}
