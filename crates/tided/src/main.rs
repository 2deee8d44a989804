//! tided — the TideGrid daemon.
//!
//! Single binary that assembles the autoscaler:
//! - State store (redb)
//! - In-memory usage provider (fed through the API)
//! - Standalone workload controller
//! - Autoscale supervisor (one loop per target)
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! tided standalone --port 8460 --data-dir /var/lib/tidegrid --config tidegrid.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};

use tidegrid_autoscale::{DecisionSink, FanoutSink, Supervisor, TracingSink};
use tidegrid_metrics::InMemoryUsageProvider;
use tidegrid_state::StateStore;
use tided::{DaemonConfig, StoreController};

#[derive(Parser)]
#[command(name = "tided", about = "TideGrid autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (store-backed workloads, all subsystems in one process).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8460")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/tidegrid")]
        data_dir: PathBuf,

        /// Path to tidegrid.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log output format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
            log_format,
        } => {
            init_tracing(log_format);
            run_standalone(port, data_dir, config).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tided=debug,tidegrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("TideGrid daemon starting in standalone mode");

    let config = match &config_path {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    let supervisor_config = config.supervisor_config()?;
    info!(config = ?config_path, "configuration loaded");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("tidegrid.redb");

    // ── Initialize subsystems ──────────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    for target in &config.targets {
        store.put_target(target)?;
        info!(target_id = %target.id(), "seed target stored");
    }

    let usage = InMemoryUsageProvider::new(config.usage_retention()?);
    let controller = Arc::new(StoreController::new(store.clone()));
    let sink = FanoutSink::new(vec![
        Arc::new(store.clone()) as Arc<dyn DecisionSink>,
        Arc::new(TracingSink),
    ]);
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(store.clone()),
        controller,
        Arc::new(usage.clone()),
        Arc::new(sink),
        supervisor_config,
    ));
    info!(
        tick_secs = supervisor_config.tick_interval.as_secs(),
        "autoscale supervisor initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────────

    let supervisor_handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            supervisor.run(shutdown_rx).await;
        })
    };

    // ── Start API server ───────────────────────────────────────────

    let router = tidegrid_api::build_router(store, usage);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for every autoscale loop to stop.
    if let Err(e) = supervisor_handle.await {
        error!(error = %e, "supervisor task ended abnormally");
    }

    info!("TideGrid daemon stopped");
    Ok(())
}
