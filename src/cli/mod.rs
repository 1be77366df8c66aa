//! Command-line interface for ordersync.
//!
//! Provides commands for a single sync run, the interval scheduler,
//! inspecting the stored watermark and showing the resolved configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::{AzureBlobStore, BlobError, BlobStore, LocalBlobStore, ShopifyClient};
use crate::config::{load_config, ResolvedConfig, StorageSettings};
use crate::core::{Scheduler, SyncOrchestrator};
use crate::domain::{RunOutcome, RunReport, Watermark};

/// ordersync - Incremental Shopify order export to an append-only CSV blob
#[derive(Parser, Debug)]
#[command(name = "ordersync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: discover .ordersync/config.yaml upwards)
    #[arg(long, global = true, env = "ORDERSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one sync now
    Run,

    /// Run syncs on a fixed interval until Ctrl+C
    Schedule {
        /// Seconds between runs (overrides the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show the stored watermark and whether the order log exists
    Status,

    /// Show resolved configuration (secrets redacted)
    Config,
}

type Orchestrator = SyncOrchestrator<Box<dyn BlobStore>, ShopifyClient>;

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run => run_once(&config).await,
            Commands::Schedule { interval } => schedule(&config, interval).await,
            Commands::Status => show_status(&config).await,
            Commands::Config => {
                println!("{}", config.redacted_summary());
                Ok(())
            }
        }
    }
}

/// Build the blob store selected by the configuration
fn build_store(config: &ResolvedConfig) -> Result<Box<dyn BlobStore>> {
    let store: Box<dyn BlobStore> = match &config.storage {
        StorageSettings::Azure(azure) => Box::new(
            AzureBlobStore::new(azure.clone()).context("Failed to set up Azure blob store")?,
        ),
        StorageSettings::Local { root } => Box::new(LocalBlobStore::new(root.clone())),
    };
    Ok(store)
}

fn build_orchestrator(config: &ResolvedConfig) -> Result<Orchestrator> {
    let store = build_store(config)?;
    let source =
        ShopifyClient::new(config.shop.clone()).context("Failed to set up Shopify client")?;
    Ok(SyncOrchestrator::new(store, source, config.target.clone()))
}

/// Every run goes through the scheduler so it takes the run lock
fn build_scheduler(
    config: &ResolvedConfig,
    interval: Duration,
) -> Result<Scheduler<Box<dyn BlobStore>, ShopifyClient>> {
    Ok(Scheduler::new(build_orchestrator(config)?, interval)
        .with_lock_file(config.schedule.lock_file.clone()))
}

fn print_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed { orders, pages } => eprintln!(
            "[Run {} completed: {} order(s) in {} page(s)]",
            report.run_id, orders, pages
        ),
        RunOutcome::Failed { stage, error } => {
            eprintln!("[Run {} failed during {}: {}]", report.run_id, stage, error)
        }
        RunOutcome::Skipped => eprintln!("[Run skipped: another sync holds the lock]"),
    }
}

/// Execute the `run` command
async fn run_once(config: &ResolvedConfig) -> Result<()> {
    let scheduler = build_scheduler(config, config.schedule.interval)?;
    let report = scheduler.trigger().await?;
    print_report(&report);

    if report.is_failure() {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute the `schedule` command
async fn schedule(config: &ResolvedConfig, interval: Option<u64>) -> Result<()> {
    let interval = match interval {
        Some(0) => anyhow::bail!("Interval must be at least 1 second"),
        Some(secs) => Duration::from_secs(secs),
        None => config.schedule.interval,
    };
    let scheduler = build_scheduler(config, interval)?;

    eprintln!(
        "Syncing {} every {}s. Press Ctrl+C to stop.",
        config.shop.base_url,
        interval.as_secs()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
            std::future::pending::<()>().await;
        }
    };
    let runs = scheduler.run_until(shutdown).await;

    eprintln!("Stopped after {} run(s)", runs);
    Ok(())
}

/// Execute the `status` command
async fn show_status(config: &ResolvedConfig) -> Result<()> {
    let store = build_store(config)?;
    let target = &config.target;

    println!("Store: {} ({})", store.name(), config.storage.backend());
    println!("Container: {}", target.container);

    match store.read_text(&target.container, &target.watermark_blob).await {
        Ok(text) => match text.parse::<Watermark>() {
            Ok(watermark) => println!("Watermark: {}", watermark),
            Err(e) => println!("Watermark: unreadable ({})", e),
        },
        Err(BlobError::NotFound { .. }) | Err(BlobError::ContainerNotFound(_)) => {
            println!("Watermark: (not initialized)")
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to read {}/{}", target.container, target.watermark_blob)
            })
        }
    }

    let log_exists = store
        .blob_exists(&target.container, &target.orders_blob)
        .await
        .with_context(|| format!("Failed to check {}/{}", target.container, target.orders_blob))?;
    println!(
        "Order log: {} ({})",
        target.orders_blob,
        if log_exists { "present" } else { "missing" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_schedule_with_interval() {
        let cli = Cli::try_parse_from(["ordersync", "schedule", "--interval", "60"]).unwrap();
        assert!(matches!(cli.command, Commands::Schedule { interval: Some(60) }));
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["ordersync", "run", "--config", "/etc/ordersync.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ordersync.yaml")));
        assert!(matches!(cli.command, Commands::Run));
    }
}
