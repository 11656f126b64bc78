//! Durable record of a spilled partial result.
//!
//! The manifest lists spill segments in write order. It is persisted beside
//! the segments so a caller that received `ResourceExceeded` can stream the
//! result back later.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::SpillId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

/// One persisted spill segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillEntry {
    /// Storage path relative to the spill root.
    pub path: String,
    pub rows: u64,
    /// Encoded (on-disk) size.
    pub bytes: u64,
    pub checksum: Hash256,
    #[serde(default)]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillManifest {
    pub id: ManifestId,
    pub spill_id: SpillId,
    pub dataset: String,
    pub segments: Vec<SpillEntry>,

    /// True while in-memory state newer than the last segment exists.
    pub pending_merge: bool,

    pub total_rows: u64,

    /// Milliseconds since Unix epoch (UTC).
    pub created_ms: u64,
}

impl SpillManifest {
    pub fn new(spill_id: SpillId, dataset: impl Into<String>) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            spill_id,
            dataset: dataset.into(),
            segments: Vec::new(),
            pending_merge: false,
            total_rows: 0,
            created_ms: now_ms(),
        }
    }

    pub fn push(&mut self, entry: SpillEntry) {
        self.total_rows += entry.rows;
        self.segments.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn spilled_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.path.as_str()).collect()
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
