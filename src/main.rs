// ABOUTME: CLI entry point for collection-exporter
// ABOUTME: Parses flags, sets up logging and runs the export loop or a single cycle

use clap::Parser;
use collection_exporter::{DaemonConfig, HttpTransmitter, RunCoordinator, DEFAULT_REQUEST_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "collection-exporter")]
#[command(
    about = "Posts newly appended collection records to a remote endpoint, resuming from a checkpoint file",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Path to the TOML config, re-read before every cycle [default: config.toml]
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to the checkpoint file, created from the config defaults if missing
    /// [default: previous_run.json]
    #[arg(long = "state-file")]
    state_file: Option<PathBuf>,
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
    /// Seconds to wait after a failed cycle before retrying [default: 60]
    #[arg(long = "crash-backoff-secs")]
    crash_backoff_secs: Option<u64>,
    /// Timeout in seconds for the request posting each batch [default: 30]
    #[arg(long = "request-timeout-secs")]
    request_timeout_secs: Option<u64>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

impl Cli {
    /// Daemon settings, falling back to [`DaemonConfig::default`] for unset flags.
    fn daemon_config(&self) -> DaemonConfig {
        let defaults = DaemonConfig::default();
        DaemonConfig {
            config_path: self.config.clone().unwrap_or(defaults.config_path),
            state_path: self.state_file.clone().unwrap_or(defaults.state_path),
            crash_backoff: self
                .crash_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.crash_backoff),
        }
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let transmitter = HttpTransmitter::new(cli.request_timeout())?;
    let coordinator = RunCoordinator::new(cli.daemon_config(), transmitter);

    if cli.once {
        tracing::info!("Running single export cycle...");
        let report = coordinator.run_once().await?;
        tracing::info!(
            "Export complete: {} collections, {} records in {}ms",
            report.collections,
            report.records_sent,
            report.duration_ms
        );
        for checkpoint in report.checkpoints.iter() {
            tracing::info!("  {} -> {}", checkpoint.name, checkpoint.last_id);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive; a dropped channel would read as shutdown
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    coordinator.run(shutdown_rx).await
}
