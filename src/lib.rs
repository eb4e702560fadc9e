// src/lib.rs
// =============================================================================
// link-keeper: a bounded-concurrency reachability checker with a crash-safe
// task log.
//
// Modules, leaf first:
// - domain: Task, LinkStatus and the result map
// - clock: injectable time source for backoff and cooldowns
// - checker: circuit breaker, SSRF guard and the retrying probe
// - store: append-only task log with an in-memory index
// - orchestrator: batch fan-out, background persistence retries, reports
// - config / cli: settings and the command-line surface used by main.rs
// =============================================================================

pub mod checker;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod store;
