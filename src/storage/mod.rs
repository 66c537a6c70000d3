// ABOUTME: Storage query surface used by the scanner, plus database file discovery
// ABOUTME: Records are opaque JSON documents carrying a strictly increasing integer id

pub mod sqlite;

use anyhow::{bail, Context, Result};
use serde::{Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};

pub use sqlite::SqliteSource;

/// One stored entry of a collection.
///
/// The document is passed through to the remote endpoint untouched; `id` is a
/// copy of its identifier field used for checkpointing.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub document: serde_json::Value,
}

impl Record {
    pub fn new(id: i64, document: serde_json::Value) -> Self {
        Self { id, document }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

/// Queries the scanner needs from the embedded database.
///
/// A collection that does not exist must produce an error, not an empty
/// result: a typo in the checkpoint list should fail the cycle loudly.
pub trait CollectionSource {
    /// The record with the greatest id, or `None` for an empty collection.
    fn latest(&self, collection: &str) -> Result<Option<Record>>;

    /// Up to `limit` records with `id > after`, in ascending id order.
    fn records_after(&self, collection: &str, after: i64, limit: usize) -> Result<Vec<Record>>;
}

/// Locate the database file under a storage root.
///
/// The game server keeps its live database directly in the root, but once it
/// starts writing backups under `Storage/Backup/<snapshot>/` the newest
/// snapshot directory is read instead. A `Storage/Backup` directory with no
/// snapshots in it is an error rather than a reason to fall back to the root.
pub fn resolve_database_path(server_dir: &Path, database_file: &str) -> Result<PathBuf> {
    let backup_root = server_dir.join("Storage").join("Backup");
    let directory = match newest_subdirectory(&backup_root)? {
        Some(dir) => {
            tracing::debug!("Using newest backup directory {:?}", dir);
            dir
        }
        None => server_dir.to_path_buf(),
    };

    let path = directory.join(database_file);
    if !path.is_file() {
        bail!("Database file {:?} does not exist", path);
    }
    Ok(path)
}

/// Most recently modified sub-directory of `dir`, or `None` if `dir` does not exist.
fn newest_subdirectory(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list backup directory {:?}", dir))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {:?}", entry.path()))?;
        if !metadata.is_dir() {
            continue;
        }
        let modified = metadata
            .modified()
            .with_context(|| format!("Failed to read mtime of {:?}", entry.path()))?;
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }

    match newest {
        Some((_, path)) => Ok(Some(path)),
        None => bail!("Backup directory {:?} contains no snapshots", dir),
    }
}
