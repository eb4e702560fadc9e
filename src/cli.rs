// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// We use the "derive" API: the CLI structure is described by the structs and
// enums below and clap generates the parsing code. Runtime settings live in
// config.rs and are flattened in here, so every subcommand accepts them.
// =============================================================================

use crate::config::Config;
use crate::domain::TaskId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "link-keeper",
    version,
    about = "Check whether hosts are reachable and keep a durable record of the results",
    long_about = "link-keeper checks a batch of bare hostnames concurrently, records every batch \
                  in an append-only task log, and renders stored batches as a report."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub config: Config,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a batch of hostnames and store the result
    ///
    /// Example: link-keeper check example.com go.dev
    Check {
        /// Bare hostnames (no scheme, path, query, fragment or port)
        #[arg(required = true)]
        links: Vec<String>,

        /// Output results in JSON format instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Render a report for previously checked batches
    ///
    /// Example: link-keeper report 1 2 --output report.txt
    Report {
        /// Task IDs printed by `check`
        #[arg(required = true, value_parser = clap::value_parser!(u64).range(1..))]
        ids: Vec<TaskId>,

        /// Write the report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show how many batches are stored and how many have results
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from(["link-keeper", "check", "example.com", "go.dev", "--json"])
            .unwrap();
        match cli.command {
            Commands::Check { links, json } => {
                assert_eq!(links, vec!["example.com", "go.dev"]);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_settings_after_subcommand() {
        let cli = Cli::try_parse_from([
            "link-keeper",
            "check",
            "example.com",
            "--max-workers",
            "4",
            "--http-timeout",
            "750ms",
        ])
        .unwrap();
        assert_eq!(cli.config.max_workers, 4);
        assert_eq!(cli.config.http_timeout, std::time::Duration::from_millis(750));
    }

    #[test]
    fn test_report_rejects_zero_id() {
        assert!(Cli::try_parse_from(["link-keeper", "report", "0"]).is_err());
        assert!(Cli::try_parse_from(["link-keeper", "report"]).is_err());

        let cli = Cli::try_parse_from(["link-keeper", "report", "3", "7", "-o", "out.txt"]).unwrap();
        match cli.command {
            Commands::Report { ids, output } => {
                assert_eq!(ids, vec![3, 7]);
                assert_eq!(output, Some(PathBuf::from("out.txt")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_requires_links() {
        assert!(Cli::try_parse_from(["link-keeper", "check"]).is_err());
    }
}
