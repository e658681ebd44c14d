//! deployd: the deployment updater daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Instance reporter (HTTP, scheduler backend)
//! - Locket lock client (optional, mTLS)
//! - Deployment updater + scheduler loop
//!
//! # Usage
//!
//! ```text
//! deployd run --config /var/vcap/jobs/deployd/config/deployd.toml
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deployd_instances::HttpInstancesReporter;
use deployd_locket::{GrpcLockService, LockClient};
use deployd_state::StateStore;
use deployd_updater::{Scheduler, Updater};

use crate::config::DeploydConfig;

#[derive(Parser)]
#[command(name = "deployd", about = "Rolling deployment updater daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the updater loop until interrupted.
    Run {
        /// Path to deployd.toml.
        #[arg(long)]
        config: PathBuf,
    },
    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config } => run(DeploydConfig::from_file(&config)?).await,
        Command::CheckConfig { config } => {
            DeploydConfig::from_file(&config)?;
            info!(path = ?config, "config ok");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,deployd=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(config: DeploydConfig) -> anyhow::Result<()> {
    info!("deployd starting");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let reporter = HttpInstancesReporter::new(
        &config.instances_reporter.url,
        config.reporter_timeout(),
    )?;
    info!(address = reporter.address(), "instance reporter configured");

    let updater = Updater::new(state, Arc::new(reporter), config.updater_options());
    let mut scheduler = Scheduler::new(updater, config.update_interval());

    let lock = match &config.locket {
        Some(locket) => {
            let service = GrpcLockService::connect_lazy(locket)?;
            let lock = Arc::new(LockClient::new(Arc::new(service), config.lock_settings()));
            lock.start();
            info!(
                key = %lock.settings().key,
                owner = %lock.settings().owner,
                ttl_secs = lock.settings().ttl.as_secs(),
                "locket lock client started"
            );
            scheduler = scheduler.with_lock(lock.clone());
            Some(lock)
        }
        None => {
            warn!("no [locket] section configured, running without a cluster lock");
            None
        }
    };

    // ── Run until Ctrl-C ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("installing CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    if let Some(lock) = lock {
        lock.stop().await;
    }

    info!("deployd stopped");
    Ok(())
}
