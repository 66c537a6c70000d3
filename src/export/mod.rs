// ABOUTME: Incremental export - per-collection scanning and batch aggregation
// ABOUTME: Pure over a CollectionSource; performs no I/O of its own

pub mod aggregator;
pub mod scanner;

pub use aggregator::{export_all, ExportBatch, ExportRun};
pub use scanner::{scan_collection, ScanResult};
