// src/main.rs
// =============================================================================
// This is the entry point of the CLI application.
//
// What happens here:
// 1. Parse command-line arguments (and their environment fallbacks)
// 2. Install the tracing subscriber (logs go to stderr, results to stdout)
// 3. Replay the task log and wire up the engine
// 4. Dispatch to the subcommand handler
// 5. Exit with a proper code (0 = all available, 1 = some not available,
//    2 = error)
// =============================================================================

use anyhow::{bail, Context, Result};
use clap::Parser;
use link_keeper::checker::{Checker, ReqwestTransport, SystemResolver};
use link_keeper::cli::{Cli, Commands};
use link_keeper::config::Config;
use link_keeper::domain::{LinkStatus, TaskId};
use link_keeper::orchestrator::{CheckOutcome, Orchestrator};
use link_keeper::store::FileStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// The store and the engine built on top of it
struct Engine {
    store: Arc<FileStore>,
    orchestrator: Orchestrator,
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let store = FileStore::open(config.log_file())
        .await
        .with_context(|| format!("failed to load task log {}", config.tasks_file.display()))?;
    let store = Arc::new(store);

    let transport =
        ReqwestTransport::new(config.http_timeout).context("failed to create HTTP client")?;
    let checker = Checker::new(
        Arc::new(transport),
        Arc::new(SystemResolver),
        Arc::new(config.breaker()),
    );
    let orchestrator = Orchestrator::new(store.clone(), Arc::new(checker), config.settings());

    Ok(Engine {
        store,
        orchestrator,
    })
}

async fn run(cli: Cli) -> Result<i32> {
    let engine = build_engine(&cli.config).await?;

    let code = match cli.command {
        Commands::Check { links, json } => handle_check(&engine, &cli.config, links, json).await?,
        Commands::Report { ids, output } => {
            handle_report(&engine, &cli.config, ids, output).await?
        }
        Commands::Stats => handle_stats(&engine),
    };

    let (total, completed) = engine.store.stats();
    info!(total_tasks = total, completed_tasks = completed, "shutdown summary");
    Ok(code)
}

// Handles the 'check' subcommand
async fn handle_check(
    engine: &Engine,
    config: &Config,
    links: Vec<String>,
    json: bool,
) -> Result<i32> {
    if links.len() > config.max_links {
        bail!(
            "batch of {} links exceeds the limit of {} (see --max-links)",
            links.len(),
            config.max_links
        );
    }

    let submitted = links.clone();
    let outcome = engine
        .orchestrator
        .check_links(links, None)
        .await
        .context("failed to create task")?;

    if json {
        print_json(&outcome)?;
    } else {
        print_table(&submitted, &outcome);
    }

    // Don't exit while a result is still being written in the background
    if outcome.deferred {
        info!(task_id = outcome.task_id, "waiting for background persistence");
    }
    engine.orchestrator.wait().await;

    Ok(if outcome.unavailable() > 0 { 1 } else { 0 })
}

// Handles the 'report' subcommand
async fn handle_report(
    engine: &Engine,
    config: &Config,
    ids: Vec<TaskId>,
    output: Option<PathBuf>,
) -> Result<i32> {
    let deadline = Instant::now() + config.report_timeout;
    let report = engine
        .orchestrator
        .generate_report(ids, deadline)
        .await
        .context("failed to generate report")?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &report)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => print!("{}", String::from_utf8_lossy(&report)),
    }
    Ok(0)
}

// Handles the 'stats' subcommand
fn handle_stats(engine: &Engine) -> i32 {
    let (total, completed) = engine.store.stats();
    println!("Tasks:     {}", total);
    println!("Completed: {}", completed);
    0
}

#[derive(Serialize)]
struct CheckResponse<'a> {
    #[serde(flatten)]
    outcome: &'a CheckOutcome,
    persisted: bool,
}

fn print_json(outcome: &CheckOutcome) -> Result<()> {
    let response = CheckResponse {
        outcome,
        persisted: !outcome.deferred,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

// Prints results as a human-readable table, in submission order
fn print_table(submitted: &[String], outcome: &CheckOutcome) {
    println!("Task #{}", outcome.task_id);
    println!("{:<60} {:<15}", "LINK", "STATUS");
    println!("{}", "=".repeat(75));

    let mut seen = std::collections::HashSet::new();
    for link in submitted {
        if !seen.insert(link) {
            continue;
        }
        let status = outcome
            .results
            .get(link)
            .copied()
            .unwrap_or(LinkStatus::NotAvailable);

        let link_display = if link.chars().count() > 57 {
            format!("{}...", link.chars().take(57).collect::<String>())
        } else {
            link.clone()
        };
        println!("{:<60} {:<15}", link_display, format_status(status));
    }

    println!();

    let broken = outcome.unavailable();
    println!("📊 Summary:");
    println!("   ✅ Available: {}", outcome.results.len() - broken);
    println!("   ❌ Not available: {}", broken);
    if outcome.deferred {
        println!("   ⏳ Result not yet persisted, retrying in the background");
    }
}

fn format_status(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Available => "✅ AVAILABLE",
        LinkStatus::NotAvailable => "❌ NOT AVAILABLE",
    }
}
