//! Main entry point for the fableval binary
//!
//! Loads a run configuration, wires up provider clients from environment
//! API keys, and drives a full evaluation run with progress logging and
//! graceful Ctrl+C stop.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

use orchestrator::services::{registry_from_env, JsonlCheckpointStore};
use orchestrator::{Orchestrator, OrchestratorResult, RunConfig, RunStatus};
use shared::logging;

/// Batch evaluation of creative-writing prompt sequences across LLM providers
#[derive(Parser)]
#[command(name = "fableval")]
#[command(about = "Runs prompt sequences against multiple LLM providers with checkpointed resume")]
pub struct Args {
    /// Path to the JSON run configuration
    #[arg(long, default_value = "fableval.json")]
    pub config: PathBuf,

    /// Skip work units already present in the checkpoint store
    #[arg(long)]
    pub resume: bool,

    /// Checkpoint store path (JSONL, created if missing)
    #[arg(long, default_value = "output/checkpoints.jsonl")]
    pub checkpoints: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    let args = Args::parse();

    // API keys come from the environment, optionally via .env
    dotenv::dotenv().ok();
    logging::init_tracing(Some(&args.log_level));
    logging::log_startup("fableval evaluation run");

    let config = RunConfig::from_file(&args.config)?;
    let providers = registry_from_env();
    let store = Arc::new(JsonlCheckpointStore::open(&args.checkpoints).await?);

    let orchestrator = Orchestrator::new(config, providers, store)?;

    // Graceful shutdown: finish in-flight calls, then halt; resumable later
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown("Received Ctrl+C, halting after in-flight calls");
                stop.stop();
            }
            Err(err) => {
                logging::log_error("Signal handling", &err);
            }
        }
    });

    // Periodic progress reporting from the push channel
    let mut progress_rx = orchestrator.progress().subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
        loop {
            ticker.tick().await;
            if progress_rx.changed().await.is_err() {
                break;
            }
            let progress = progress_rx.borrow_and_update().clone();
            tracing::info!(
                "📋 Progress: {}/{} units completed, {} failed, ETA {}",
                progress.completed_units,
                progress.total_units,
                progress.failed_units,
                progress
                    .estimated_completion
                    .map(|eta| eta.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }
    });

    let result = orchestrator.run(args.resume).await?;

    // Structured per-triple report
    println!("\n=== Run report ===");
    for outcome in &result.outcomes {
        match &outcome.error {
            Some(error) => println!(
                "{:<50} {:<10} {} units  ({error})",
                outcome.triple.to_string(),
                outcome.status.to_string(),
                outcome.completed_units
            ),
            None => println!(
                "{:<50} {:<10} {} units",
                outcome.triple.to_string(),
                outcome.status.to_string(),
                outcome.completed_units
            ),
        }
    }
    let mut per_provider: BTreeMap<&str, (usize, u32)> = BTreeMap::new();
    for outcome in &result.outcomes {
        let entry = per_provider
            .entry(outcome.triple.provider.as_str())
            .or_default();
        entry.0 += 1;
        entry.1 += outcome.completed_units;
    }
    println!("\nPer provider:");
    for (provider, (triples, units)) in &per_provider {
        println!("  {provider:<12} {triples} triples, {units} units completed");
    }

    println!(
        "\nStatus: {:?} ({}/{} units completed, {} failed)",
        result.status,
        result.progress.completed_units,
        result.progress.total_units,
        result.progress.failed_units
    );
    let retries = orchestrator.retry_attempts().await;
    if !retries.is_empty() {
        println!("Retries issued: {}", retries.len());
    }

    match result.status {
        RunStatus::Success => logging::log_success("All triples completed"),
        RunStatus::Partial => logging::log_success("Run finished with partial failures"),
        RunStatus::Stopped => logging::log_success("Run stopped; resume with --resume"),
    }
    Ok(())
}
