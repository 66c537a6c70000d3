// ABOUTME: Library crate for collection-exporter
// ABOUTME: Checkpointed incremental export of embedded-database collections

pub mod checkpoint;
pub mod config;
pub mod daemon;
pub mod export;
pub mod remote;
pub mod storage;
pub mod utils;

pub use checkpoint::{CheckpointSet, CheckpointStore, CollectionCheckpoint};
pub use config::{ConfigError, RunConfig};
pub use daemon::{CycleOutcome, CyclePhase, CycleReport, DaemonConfig, RunCoordinator};
pub use export::{ExportBatch, ExportRun};
pub use remote::{HttpTransmitter, Transmitter, DEFAULT_REQUEST_TIMEOUT};
pub use storage::{CollectionSource, Record, SqliteSource};
