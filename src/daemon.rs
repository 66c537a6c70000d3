// ABOUTME: RunCoordinator - drives load, scan, send and commit for each export cycle
// ABOUTME: Repeats cycles on a fixed pause and absorbs failures with a fixed backoff

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::checkpoint::{CheckpointSet, CheckpointStore};
use crate::config::RunConfig;
use crate::export::{export_all, ExportRun};
use crate::remote::Transmitter;
use crate::storage::{resolve_database_path, SqliteSource};

/// Process-level settings for the coordinator.
///
/// Unlike [`RunConfig`], these are fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// TOML file re-read at the start of every cycle
    pub config_path: PathBuf,
    /// Checkpoint file
    pub state_path: PathBuf,
    /// Pause after a failed cycle before trying again
    pub crash_backoff: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            state_path: CheckpointStore::default_path(),
            crash_backoff: Duration::from_secs(60),
        }
    }
}

/// Progress of a single cycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CyclePhase {
    Idle,
    /// Checkpoints loaded
    Loaded,
    /// All collections scanned, batch built
    Scanned,
    /// Batch accepted by the remote endpoint
    Sent,
    /// Advanced checkpoints persisted
    Committed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Loaded => "loaded",
            CyclePhase::Scanned => "scanned",
            CyclePhase::Sent => "sent",
            CyclePhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Summary of a committed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub collections: usize,
    pub records_sent: usize,
    /// Collections whose checkpoint was rewound to an older dataset
    pub resets: Vec<(String, i64)>,
    /// Checkpoints now on disk
    pub checkpoints: CheckpointSet,
    pub duration_ms: u64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Result of one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Committed(CycleReport),
    /// `phase` is the last phase reached before `reason` stopped the cycle.
    /// Nothing is persisted unless the failure happened while committing.
    Failed {
        phase: CyclePhase,
        reason: anyhow::Error,
    },
}

impl CycleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed(_))
    }
}

/// Orchestrates export cycles.
///
/// A cycle is strictly sequential:
/// 1. Load checkpoints (seeding them from config on first run)
/// 2. Scan every collection for records past its checkpoint
/// 3. Send the batch
/// 4. Persist the advanced checkpoints
///
/// Step 4 only runs after step 3 succeeded, so a crash or failure anywhere
/// before it leaves the previous checkpoints in place and the same records are
/// fetched again next cycle (at-least-once delivery). A failure *in* step 4
/// means the endpoint already has the batch and will receive it a second
/// time; that duplicate window is inherent to the design and is logged.
pub struct RunCoordinator<T> {
    config: DaemonConfig,
    store: CheckpointStore,
    transmitter: T,
}

impl<T: Transmitter> RunCoordinator<T> {
    pub fn new(config: DaemonConfig, transmitter: T) -> Self {
        let store = CheckpointStore::new(config.state_path.clone());
        Self {
            config,
            store,
            transmitter,
        }
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// Run one cycle with an already loaded config.
    pub async fn run_cycle(&self, config: &RunConfig) -> CycleOutcome {
        let start = Instant::now();
        let mut phase = CyclePhase::Idle;

        match self.drive_cycle(config, &mut phase).await {
            Ok(run) => CycleOutcome::Committed(CycleReport {
                collections: run.batch.collection_count(),
                records_sent: run.batch.record_count(),
                resets: run.resets,
                checkpoints: run.checkpoints,
                duration_ms: start.elapsed().as_millis() as u64,
                finished_at: chrono::Utc::now(),
            }),
            Err(reason) => CycleOutcome::Failed { phase, reason },
        }
    }

    async fn drive_cycle(&self, config: &RunConfig, phase: &mut CyclePhase) -> Result<ExportRun> {
        let checkpoints = self.store.load(&config.default_checkpoints()).await?;
        warn_unseeded_collections(config, &checkpoints, &self.store);
        advance(phase, CyclePhase::Loaded);

        let run = scan_storage(config, &checkpoints).await?;
        advance(phase, CyclePhase::Scanned);

        self.transmitter
            .send(&config.api_url, &run.batch, &config.api_access_token)
            .await?;
        advance(phase, CyclePhase::Sent);

        tracing::info!("Writing checkpoints to {:?}", self.store.path());
        self.store.save(&run.checkpoints).await?;
        advance(phase, CyclePhase::Committed);

        Ok(run)
    }

    /// Load the config file and run a single cycle.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let config = RunConfig::load(&self.config.config_path)?;
        match self.run_cycle(&config).await {
            CycleOutcome::Committed(report) => Ok(report),
            CycleOutcome::Failed { phase, reason } => {
                Err(reason.context(format!("Export cycle failed after phase '{}'", phase)))
            }
        }
    }

    /// Run cycles until a shutdown signal arrives.
    ///
    /// The pause is measured from the end of one cycle to the start of the
    /// next, so a slow cycle delays the schedule instead of overlapping it.
    /// Shutdown is only observed while pausing; a cycle in flight always runs
    /// to completion or failure.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut cycles = 0u64;

        tracing::info!(
            "Starting exporter with config {:?}, checkpoints {:?}, crash backoff {:?}",
            self.config.config_path,
            self.config.state_path,
            self.config.crash_backoff
        );

        loop {
            cycles += 1;
            let pause = self.supervised_cycle(cycles).await;

            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping exporter");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        Ok(())
    }

    /// Run one cycle, log how it ended and return how long to pause.
    async fn supervised_cycle(&self, cycle: u64) -> Duration {
        tracing::info!("Starting export cycle {}", cycle);

        let config = match RunConfig::load(&self.config.config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Export cycle {} crashed loading config: {:?}", cycle, e);
                return self.config.crash_backoff;
            }
        };

        match self.run_cycle(&config).await {
            CycleOutcome::Committed(report) => {
                tracing::info!(
                    "Export cycle {} completed: {} collections, {} records in {}ms",
                    cycle,
                    report.collections,
                    report.records_sent,
                    report.duration_ms
                );
                for (name, id) in &report.resets {
                    tracing::warn!("Checkpoint for '{}' was rewound to {}", name, id);
                }
                config.poll_interval()
            }
            CycleOutcome::Failed { phase, reason } => {
                if phase == CyclePhase::Sent {
                    tracing::warn!(
                        "Batch was delivered but checkpoints were not saved; \
                         the same records will be sent again next cycle"
                    );
                }
                tracing::error!(
                    "Export cycle {} crashed after phase '{}': {:?}",
                    cycle,
                    phase,
                    reason
                );
                self.config.crash_backoff
            }
        }
    }
}

fn advance(phase: &mut CyclePhase, next: CyclePhase) {
    debug_assert!(next > *phase);
    tracing::debug!("Cycle phase {} -> {}", phase, next);
    *phase = next;
}

/// Collections added to the config after the checkpoint file was created are
/// not exported until the file is re-seeded.
fn warn_unseeded_collections(config: &RunConfig, checkpoints: &CheckpointSet, store: &CheckpointStore) {
    for configured in &config.collections {
        if checkpoints.get(&configured.name).is_none() {
            tracing::warn!(
                "Collection '{}' is configured but has no checkpoint in {:?}; it will not be exported",
                configured.name,
                store.path()
            );
        }
    }
}

/// Open the database and scan every collection off the async runtime.
///
/// The connection lives only inside this step and is closed before the batch
/// is transmitted.
async fn scan_storage(config: &RunConfig, checkpoints: &CheckpointSet) -> Result<ExportRun> {
    let limit = config.query_limit()?;
    let path = resolve_database_path(&config.server_dir, &config.database_file)?;
    let id_field = config.id_field.clone();
    let checkpoints = checkpoints.clone();

    tracing::info!("Scanning {} collections in {:?}", checkpoints.len(), path);
    tokio::task::spawn_blocking(move || {
        let source = SqliteSource::open(&path, &id_field)?;
        export_all(&source, &checkpoints, limit)
    })
    .await
    .context("Collection scan task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_default() {
        let config = DaemonConfig::default();
        assert_eq!(config.config_path, PathBuf::from("config.toml"));
        assert_eq!(config.state_path, PathBuf::from("previous_run.json"));
        assert_eq!(config.crash_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_cycle_phases_are_ordered() {
        assert!(CyclePhase::Idle < CyclePhase::Loaded);
        assert!(CyclePhase::Loaded < CyclePhase::Scanned);
        assert!(CyclePhase::Scanned < CyclePhase::Sent);
        assert!(CyclePhase::Sent < CyclePhase::Committed);
        assert_eq!(CyclePhase::Sent.to_string(), "sent");
    }

    #[test]
    fn test_advance_moves_forward() {
        let mut phase = CyclePhase::Idle;
        advance(&mut phase, CyclePhase::Loaded);
        assert_eq!(phase, CyclePhase::Loaded);
    }

    #[test]
    fn test_cycle_outcome_is_committed() {
        let failed = CycleOutcome::Failed {
            phase: CyclePhase::Scanned,
            reason: anyhow::anyhow!("endpoint down"),
        };
        assert!(!failed.is_committed());

        let committed = CycleOutcome::Committed(CycleReport {
            collections: 1,
            records_sent: 0,
            resets: vec![],
            checkpoints: CheckpointSet::default(),
            duration_ms: 3,
            finished_at: chrono::Utc::now(),
        });
        assert!(committed.is_committed());
    }
}
