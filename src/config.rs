// src/config.rs
// =============================================================================
// Runtime settings.
//
// Every setting is a CLI flag that falls back to an environment variable and
// then to a default, so the same binary works from a shell or a container:
//
//   link-keeper --max-workers 20 check example.com
//   MAX_WORKERS=20 link-keeper check example.com
//
// Durations accept "500ms", "5s", "2m" or a bare number of seconds.
// =============================================================================

use crate::checker::{CircuitBreaker, DEFAULT_THRESHOLD};
use crate::orchestrator::{RetryPolicy, Settings};
use crate::store::LogFile;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Task log file (rotated segments are kept next to it)
    #[arg(long, env = "TASKS_FILE", default_value = "tasks.json", global = true)]
    pub tasks_file: PathBuf,

    /// Deadline for checking one whole batch
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "5s", value_parser = parse_duration, global = true)]
    pub http_timeout: Duration,

    /// Outbound checks allowed at the same time
    #[arg(long, env = "MAX_WORKERS", default_value_t = 100, global = true)]
    pub max_workers: usize,

    /// Largest batch accepted by `check`
    #[arg(long, env = "MAX_LINKS", default_value_t = 50, global = true)]
    pub max_links: usize,

    /// Background workers rendering reports
    #[arg(long, env = "REPORT_WORKERS", default_value_t = 2, global = true)]
    pub report_workers: usize,

    /// How long `report` may take before giving up
    #[arg(long, env = "REPORT_TIMEOUT", default_value = "30s", value_parser = parse_duration, global = true)]
    pub report_timeout: Duration,

    /// Failures before a host's circuit opens
    #[arg(long, env = "BREAKER_THRESHOLD", default_value_t = DEFAULT_THRESHOLD, global = true)]
    pub breaker_threshold: u32,

    /// How long an open circuit stays open
    #[arg(long, env = "BREAKER_COOLDOWN", default_value = "30s", value_parser = parse_duration, global = true)]
    pub breaker_cooldown: Duration,

    /// Rotate the task log once it reaches this many bytes
    #[arg(long, env = "LOG_MAX_BYTES", default_value_t = crate::store::DEFAULT_MAX_BYTES, global = true)]
    pub log_max_bytes: u64,

    /// Days to keep rotated task log segments (0 keeps them forever)
    #[arg(long, env = "LOG_RETENTION_DAYS", default_value_t = 7, global = true)]
    pub log_retention_days: u64,
}

impl Config {
    pub fn log_file(&self) -> LogFile {
        let retention = Duration::from_secs(self.log_retention_days.saturating_mul(24 * 60 * 60));
        LogFile::new(&self.tasks_file).with_rotation(self.log_max_bytes, retention)
    }

    pub fn breaker(&self) -> CircuitBreaker {
        // Zero values fall back to the breaker's own defaults
        CircuitBreaker::new(self.breaker_threshold, self.breaker_cooldown)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            timeout: self.http_timeout,
            max_workers: self.max_workers,
            report_workers: self.report_workers,
            retry: RetryPolicy::default(),
        }
    }
}

/// Parse "500ms", "5s", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| format!("invalid duration '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration(" 10 "), Ok(Duration::from_secs(10)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5h").is_err());
    }
}
