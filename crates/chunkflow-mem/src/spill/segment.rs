//! Segment naming and metadata.
//!
//! Segments are named `spill{id}_run{n}.parquet`. The end-to-end checksum is
//! blake3 over the encoded file bytes.

use serde::{Deserialize, Serialize};

use chunkflow_core::hash::Hash256;
use chunkflow_core::id::SpillId;
use chunkflow_core::manifest::SpillEntry;

use super::Codec;

pub const SEGMENT_EXT: &str = "parquet";

/// Human-friendly name for a segment, derived from a spill id and a run index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: SpillId, run_index: u32) -> Self {
        SegmentName(format!("spill{}_run{}", id.get(), run_index))
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, SEGMENT_EXT)
    }
}

/// Metadata the spill manager keeps for a written segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub codec: Codec,
    pub rows: u64,
    /// Estimated in-memory size of the rows that were spilled.
    pub source_bytes: u64,
    /// Encoded size on storage.
    pub encoded_bytes: u64,
    pub checksum: Hash256,
    pub etag: Option<String>,
}

impl From<&SegmentMeta> for SpillEntry {
    fn from(meta: &SegmentMeta) -> Self {
        SpillEntry {
            path: meta.path.clone(),
            rows: meta.rows,
            bytes: meta.encoded_bytes,
            checksum: meta.checksum,
            etag: meta.etag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_run_index() {
        let n = SegmentName::new(SpillId::new(42), 3);
        assert_eq!(n.0, "spill42_run3");
        assert_eq!(n.file_name(), "spill42_run3.parquet");
    }
}
