// src/clock.rs
// =============================================================================
// Time as an injectable capability.
//
// The circuit breaker needs "now" to measure its cooldown, and both retry
// loops need to wait between attempts. Going through this trait instead of
// calling Instant::now() / tokio::time::sleep directly lets tests replace
// real waiting with a clock that just records the requested delays.
// =============================================================================

use async_trait::async_trait;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Wait for `duration` to pass.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
