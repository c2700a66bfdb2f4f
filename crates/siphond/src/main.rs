//! siphond: the Siphon daemon.
//!
//! Single binary that wires the scheduler together:
//! - Configuration (`siphon.toml`)
//! - Environment backend (the in-process simulation)
//! - Worker pool discovery
//! - Target selection and status reporting
//! - Batch scheduler + optional trainer
//!
//! # Usage
//!
//! ```text
//! siphond init
//! siphond run --config siphon.toml --percent 10
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use siphon_core::{Environment, SiphonConfig, Target};
use siphon_pool::NodePool;
use siphon_scheduler::{Scheduler, StabilizeTrainer, StatusReporter, TrainerMode, select_target};
use siphon_sim::SimEnvironment;

#[derive(Parser)]
#[command(name = "siphond", about = "Siphon batch scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C.
    Run {
        /// Path to the configuration file.
        #[arg(long, default_value = "siphon.toml")]
        config: PathBuf,

        /// Target host; overrides `[scheduler] target`.
        #[arg(long)]
        target: Option<String>,

        /// Share of the Target's value taken per batch, in percent.
        #[arg(long)]
        percent: Option<f64>,
    },

    /// Write a scaffold configuration file.
    Init {
        /// Where to write it.
        #[arg(long, default_value = "siphon.toml")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,siphond=debug,siphon=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            target,
            percent,
        } => run(&config, target, percent).await,
        Command::Init { path, force } => init(&path, force),
    }
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = SiphonConfig::scaffold().to_toml_string()?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "scaffold configuration written");
    Ok(())
}

async fn run(path: &Path, target: Option<String>, percent: Option<f64>) -> anyhow::Result<()> {
    let mut config = SiphonConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(target) = target {
        config.scheduler.target = Some(target);
    }
    if let Some(percent) = percent {
        config.scheduler.extraction_percent = percent;
    }
    config.validate()?;

    info!(config = %path.display(), "Siphon daemon starting");

    // ── Environment ────────────────────────────────────────────

    let sim = config
        .simulation
        .as_ref()
        .context("no environment backend configured: add a [simulation] section")?;
    let env: Arc<dyn Environment> = Arc::new(SimEnvironment::new(sim));
    info!(hosts = sim.hosts.len(), "simulated environment initialized");

    // ── Pool and Target ────────────────────────────────────────

    let pool = NodePool::discover(env.clone(), &config.discovery.root)?;
    if pool.is_empty() {
        anyhow::bail!("no worker nodes reachable from {}", config.discovery.root);
    }

    let target_name = match config.scheduler.target.clone() {
        Some(name) => name,
        None => select_target(env.as_ref(), &pool.names())?,
    };
    let target = Target::new(target_name.clone(), env.clone());
    info!(target_host = %target_name, nodes = pool.len(), "target chosen");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
        let _ = signal_tx.send(true);
    });

    // ── Background tasks ───────────────────────────────────────

    let status_handle = config.status.as_ref().map(|status| {
        let reporter = StatusReporter::new(
            target.clone(),
            Duration::from_millis(status.interval_ms),
        );
        tokio::spawn(reporter.run(shutdown_rx.clone()))
    });

    // ── Scheduler ──────────────────────────────────────────────

    let trainer = match &config.trainer {
        Some(t) => {
            info!(host = %t.host, "stabilize trainer enabled");
            TrainerMode::active(StabilizeTrainer::new(t.host.clone(), env.clone()))
        }
        None => TrainerMode::None,
    };

    let mut scheduler =
        Scheduler::new(env.clone(), target, pool, config.scheduler.clone()).with_trainer(trainer);
    let result = scheduler.run(shutdown_rx).await;

    // Stop background tasks whether the scheduler finished or failed.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = status_handle {
        let _ = handle.await;
    }

    match result {
        Ok(summary) => {
            info!(
                summary = %serde_json::to_string(&summary).unwrap_or_default(),
                "Siphon daemon stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "scheduler aborted");
            Err(e.into())
        }
    }
}
