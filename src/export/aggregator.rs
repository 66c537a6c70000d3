// ABOUTME: Export aggregator - scans every configured collection in order
// ABOUTME: Builds the per-cycle ExportBatch payload and the candidate CheckpointSet

use anyhow::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::scanner::scan_collection;
use crate::checkpoint::CheckpointSet;
use crate::storage::{CollectionSource, Record};

/// Per-cycle payload: collection name to its new records.
///
/// Collections keep their configured order and serialize as one JSON object.
/// A collection with nothing new is still present with an empty array, so the
/// receiver can tell "no new data" apart from "collection not exported".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportBatch {
    collections: Vec<(String, Vec<Record>)>,
}

impl ExportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, records: Vec<Record>) {
        match self.collections.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = records,
            None => self.collections.push((name.to_string(), records)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[Record]> {
        self.collections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, records)| records.as_slice())
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|(n, _)| n.as_str())
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn record_count(&self) -> usize {
        self.collections.iter().map(|(_, r)| r.len()).sum()
    }
}

impl Serialize for ExportBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.collections.len()))?;
        for (name, records) in &self.collections {
            map.serialize_entry(name, records)?;
        }
        map.end()
    }
}

/// Everything the scan step of a cycle produces.
#[derive(Debug, Clone)]
pub struct ExportRun {
    pub batch: ExportBatch,
    /// Candidate checkpoints, same order as the input set
    pub checkpoints: CheckpointSet,
    /// Collections whose checkpoint was rewound, with the id it was rewound to
    pub resets: Vec<(String, i64)>,
}

/// Scan every collection of `checkpoints`, one after another, in order.
///
/// The first failing collection aborts the whole run; there is no partial
/// batch.
pub fn export_all<S: CollectionSource + ?Sized>(
    source: &S,
    checkpoints: &CheckpointSet,
    limit: usize,
) -> Result<ExportRun> {
    let mut batch = ExportBatch::new();
    let mut updated = CheckpointSet::default();
    let mut resets = Vec::new();

    for checkpoint in checkpoints.iter() {
        tracing::info!("Starting '{}' collection export", checkpoint.name);

        let result = scan_collection(source, checkpoint, limit)?;

        tracing::info!(
            "Collected {} new records from '{}' (id {} -> {})",
            result.records.len(),
            checkpoint.name,
            checkpoint.last_id,
            result.checkpoint.last_id
        );

        if let Some(id) = result.reset_to {
            resets.push((checkpoint.name.clone(), id));
        }
        batch.insert(&checkpoint.name, result.records);
        updated.push(result.checkpoint);
    }

    Ok(ExportRun {
        batch,
        checkpoints: updated,
        resets,
    })
}
