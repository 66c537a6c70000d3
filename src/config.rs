// ABOUTME: RunConfig - immutable per-cycle settings loaded from a TOML file
// ABOUTME: Validates the query limit, endpoint URL and default checkpoint list

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::checkpoint::{CheckpointSet, CollectionCheckpoint};

const DEFAULT_DATABASE_FILE: &str = "Game.db";
const DEFAULT_ID_FIELD: &str = "_id";

/// Validation failures for a [`RunConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("query_limit must be a positive integer (got {0})")]
    InvalidQueryLimit(i64),
    #[error("api_url '{url}' is not a valid http(s) URL: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("collection '{0}' is listed more than once")]
    DuplicateCollection(String),
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
    #[error("id_field '{0}' is not a valid column name")]
    InvalidIdField(String),
}

/// Settings for one export cycle.
///
/// Read fresh from disk before every cycle so that a changed credential,
/// limit or interval takes effect without restarting the process.
#[derive(Clone, Deserialize)]
pub struct RunConfig {
    /// Remote endpoint receiving the batch
    pub api_url: String,
    /// Sent verbatim as the `Authorization` header
    pub api_access_token: String,
    /// Maximum records fetched per collection per cycle
    pub query_limit: i64,
    /// Pause between the end of one cycle and the start of the next
    pub poll_interval_secs: u64,
    /// Storage root; see [`crate::storage::resolve_database_path`]
    pub server_dir: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Integer identifier column present in every collection
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Starting checkpoints, in export order. Only used when no checkpoint
    /// file exists yet.
    #[serde(default)]
    pub collections: Vec<CollectionCheckpoint>,
}

fn default_database_file() -> String {
    DEFAULT_DATABASE_FILE.to_string()
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

impl RunConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid config in {:?}", path))?;
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.query_limit()?;

        let parsed = url::Url::parse(&self.api_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: self.api_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                url: self.api_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        crate::utils::validate_collection_name(&self.id_field)
            .map_err(|_| ConfigError::InvalidIdField(self.id_field.clone()))?;

        let mut seen = HashSet::new();
        for checkpoint in &self.collections {
            crate::utils::validate_collection_name(&checkpoint.name)
                .map_err(|e| ConfigError::InvalidCollection(e.to_string()))?;
            if !seen.insert(checkpoint.name.as_str()) {
                return Err(ConfigError::DuplicateCollection(checkpoint.name.clone()));
            }
        }

        Ok(())
    }

    /// The per-query record cap as a usable count.
    pub fn query_limit(&self) -> Result<usize, ConfigError> {
        if self.query_limit <= 0 {
            return Err(ConfigError::InvalidQueryLimit(self.query_limit));
        }
        usize::try_from(self.query_limit).map_err(|_| ConfigError::InvalidQueryLimit(self.query_limit))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Checkpoints used to seed a missing checkpoint file.
    pub fn default_checkpoints(&self) -> CheckpointSet {
        CheckpointSet::new(self.collections.clone())
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("api_url", &self.api_url)
            .field("api_access_token", &"***")
            .field("query_limit", &self.query_limit)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("server_dir", &self.server_dir)
            .field("database_file", &self.database_file)
            .field("id_field", &self.id_field)
            .field("collections", &self.collections)
            .finish()
    }
}
