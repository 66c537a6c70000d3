// ABOUTME: Checkpoint store - per-collection high-water marks persisted between runs
// ABOUTME: Seeds the file from config defaults on first run and replaces it atomically

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Last processed record identifier for one collection.
///
/// Records with an id greater than `last_id` have not been exported yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCheckpoint {
    pub name: String,
    #[serde(rename = "id")]
    pub last_id: i64,
}

impl CollectionCheckpoint {
    pub fn new(name: &str, last_id: i64) -> Self {
        Self {
            name: name.to_string(),
            last_id,
        }
    }
}

/// Ordered checkpoints, one per configured collection.
///
/// Serialized as a plain JSON array of `{ "name", "id" }` objects. The order is
/// the export order and is preserved across load and save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointSet {
    checkpoints: Vec<CollectionCheckpoint>,
}

impl CheckpointSet {
    pub fn new(checkpoints: Vec<CollectionCheckpoint>) -> Self {
        Self { checkpoints }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionCheckpoint> {
        self.checkpoints.iter()
    }

    pub fn get(&self, name: &str) -> Option<&CollectionCheckpoint> {
        self.checkpoints.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn push(&mut self, checkpoint: CollectionCheckpoint) {
        self.checkpoints.push(checkpoint);
    }

    /// Reject sets that name a collection twice.
    pub fn ensure_unique(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for checkpoint in &self.checkpoints {
            if !seen.insert(checkpoint.name.as_str()) {
                bail!(
                    "Checkpoint for collection '{}' appears more than once",
                    checkpoint.name
                );
            }
        }
        Ok(())
    }
}

impl FromIterator<CollectionCheckpoint> for CheckpointSet {
    fn from_iter<I: IntoIterator<Item = CollectionCheckpoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// File-backed store for the [`CheckpointSet`].
///
/// The file is the only durable state of the exporter. It is rewritten
/// wholesale, and only after a cycle's batch has been accepted by the remote
/// endpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default checkpoint file in the current directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("previous_run.json")
    }

    /// Load the persisted checkpoints.
    ///
    /// When no file exists yet, `defaults` is written first and then returned,
    /// so every later load reads the same state back.
    pub async fn load(&self, defaults: &CheckpointSet) -> Result<CheckpointSet> {
        let exists = fs::try_exists(&self.path)
            .await
            .with_context(|| format!("Failed to check checkpoint file {:?}", self.path))?;

        if !exists {
            tracing::info!(
                "No checkpoint file at {:?}, seeding {} default checkpoints",
                self.path,
                defaults.len()
            );
            defaults.ensure_unique()?;
            self.save(defaults).await?;
            return Ok(defaults.clone());
        }

        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read checkpoints from {:?}", self.path))?;
        let set: CheckpointSet = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse checkpoints from {:?}", self.path))?;
        set.ensure_unique()
            .with_context(|| format!("Corrupt checkpoint file {:?}", self.path))?;

        tracing::debug!("Loaded {} checkpoints from {:?}", set.len(), self.path);
        Ok(set)
    }

    /// Replace the checkpoint file with `set`.
    ///
    /// Writes a sibling temp file, syncs it and renames it over the target, so
    /// a kill mid-write leaves either the old or the new file, never a torn one.
    pub async fn save(&self, set: &CheckpointSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let contents =
            serde_json::to_string_pretty(set).context("Failed to serialize checkpoints")?;

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {:?}", temp_path))?;
        file.write_all(contents.as_bytes())
            .await
            .with_context(|| format!("Failed to write checkpoints to {:?}", temp_path))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {:?}", temp_path))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move {:?} into place at {:?}", temp_path, self.path))?;
        self.sync_parent_dir().await
    }

    /// Flush the directory entry so the rename itself survives a power loss.
    #[cfg(unix)]
    async fn sync_parent_dir(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = fs::File::open(parent)
            .await
            .with_context(|| format!("Failed to open directory {:?}", parent))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to sync directory {:?}", parent))?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_parent_dir(&self) -> Result<()> {
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoints".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
