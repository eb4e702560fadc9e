// src/checker/mod.rs
// =============================================================================
// This module contains all per-link checking logic.
//
// Submodules:
// - breaker: per-host circuit breaker
// - guard: link syntax rules, normalization and the SSRF guard
// - transport: the HTTP and DNS capabilities (real and stub)
// - probe: the Checker itself, with its retry loop
//
// This file is the module root. It re-exports the public API so the rest of
// the crate can write `checker::Checker` instead of `checker::probe::Checker`.
// =============================================================================

mod breaker;
mod guard;
mod probe;
mod transport;

pub use breaker::{CircuitBreaker, DEFAULT_COOLDOWN, DEFAULT_THRESHOLD};
pub use guard::{is_private_ip, normalize_link, parse_candidate, validate_link, SsrfGuard};
pub use probe::{Checker, DEFAULT_BACKOFFS};
pub use transport::{HttpTransport, ReqwestTransport, Resolver, SystemResolver};

#[cfg(test)]
pub(crate) use transport::testing;

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why are HttpTransport and Resolver traits?
//    - The checker only needs "GET returns a status" and "name returns IPs"
//    - Tests hand in stubs, so no test ever touches the real network
//
// 2. What is Arc<dyn Trait>?
//    - A shared, reference-counted pointer to "some type implementing Trait"
//    - Many concurrent checks can hold the same transport and breaker
// -----------------------------------------------------------------------------
