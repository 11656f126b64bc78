//! Spill manager for memory-bounded operators.
//!
//! Orchestrates writing/reading RowBatch segments to/from storage with checksums
//! and keeps the `SpillManifest` that records them.

pub mod codec;
pub mod segment;

use std::collections::VecDeque;
use std::sync::Arc;

use chunkflow_core::hash::hash_bytes;
use chunkflow_core::id::SpillId;
use chunkflow_core::manifest::{SpillEntry, SpillManifest};
use chunkflow_core::types::RowBatch;

use crate::error::{Error, Result};

pub use codec::Codec;
pub use segment::{SegmentMeta, SegmentName};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Abstract storage interface for spill segments.
///
/// Implemented by `chunkflow-io::FsStorage` for the local filesystem and by
/// `chunkflow-io::MemoryStorage` for tests and ephemeral runs.
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a byte range from a path. Returns at most `len` bytes.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;

    /// Get an ETag or hash for a path.
    fn etag(&self, path: &str) -> Result<Option<String>>;

    /// Read a whole object.
    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let len = self.size(path)?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Storage(format!("object too large: {path}")))?;
        self.read_range(path, 0, len)
    }
}

/// Writes the spill segments of one operation call.
///
/// Segments land under `{root_dir}/spill{id}/`, next to the persisted
/// `manifest.json`.
pub struct SpillManager {
    storage: Arc<dyn Storage>,
    codec: Codec,
    dir: String,
    spill_id: SpillId,
    next_run: u32,
    manifest: SpillManifest,
}

impl SpillManager {
    /// Create a new SpillManager with the given storage backend.
    pub fn new(
        storage: Arc<dyn Storage>,
        codec: Codec,
        root_dir: &str,
        dataset: impl Into<String>,
    ) -> Self {
        let spill_id = SpillId::random();
        let dir = format!("{}/spill{}", root_dir.trim_end_matches('/'), spill_id.get());
        Self {
            storage,
            codec,
            dir,
            spill_id,
            next_run: 0,
            manifest: SpillManifest::new(spill_id, dataset),
        }
    }

    pub fn spill_id(&self) -> SpillId {
        self.spill_id
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn manifest(&self) -> &SpillManifest {
        &self.manifest
    }

    pub fn segment_count(&self) -> usize {
        self.manifest.segments.len()
    }

    /// Mark whether in-memory state newer than the last segment exists.
    pub fn set_pending_merge(&mut self, pending: bool) {
        self.manifest.pending_merge = pending;
    }

    /// Write a RowBatch as the next segment and record it in the manifest.
    ///
    /// Steps:
    /// 1. Encode batch as compressed parquet
    /// 2. Compute BLAKE3 checksum over the file bytes
    /// 3. Write to storage
    /// 4. Append a manifest entry
    pub fn write_batch(&mut self, batch: &RowBatch) -> Result<SegmentMeta> {
        let encoded = codec::encode(self.codec, batch)?;
        let checksum = hash_bytes(&encoded);

        let name = SegmentName::new(self.spill_id, self.next_run);
        self.next_run += 1;
        let path = format!("{}/{}", self.dir, name.file_name());

        self.storage.write(&path, &encoded)?;
        let etag = self.storage.etag(&path).ok().flatten();

        let meta = SegmentMeta {
            name,
            path,
            codec: self.codec,
            rows: batch.num_rows() as u64,
            source_bytes: batch.estimated_bytes() as u64,
            encoded_bytes: encoded.len() as u64,
            checksum,
            etag,
        };
        self.manifest.push(SpillEntry::from(&meta));

        tracing::info!(
            segment = %meta.path,
            rows = meta.rows,
            source_bytes = meta.source_bytes,
            encoded_bytes = meta.encoded_bytes,
            "spilled segment"
        );
        Ok(meta)
    }

    pub fn manifest_path(&self) -> String {
        format!("{}/{}", self.dir, MANIFEST_FILE)
    }

    /// Persist the manifest beside the segments and return its path.
    pub fn persist_manifest(&self) -> Result<String> {
        let path = self.manifest_path();
        let bytes = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| Error::Manifest(format!("serialize: {e}")))?;
        self.storage.write(&path, &bytes)?;
        Ok(path)
    }

    /// Load a persisted manifest.
    pub fn load_manifest(storage: &dyn Storage, path: &str) -> Result<SpillManifest> {
        let bytes = storage.read_all(path)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Manifest(format!("{path}: {e}")))
    }

    /// Stream this manager's segments back in write order.
    pub fn reader(&self) -> SpillReader {
        SpillReader::new(self.storage.clone(), &self.manifest)
    }

    /// Delete every segment and the manifest file.
    pub fn cleanup(&mut self) -> Result<()> {
        for entry in self.manifest.segments.drain(..) {
            self.storage.delete(&entry.path)?;
        }
        self.manifest.total_rows = 0;
        self.storage.delete(&self.manifest_path())?;
        tracing::debug!(dir = %self.dir, "spill segments removed");
        Ok(())
    }
}

/// Read one segment, verifying its checksum.
pub fn read_segment(storage: &dyn Storage, entry: &SpillEntry) -> Result<Vec<RowBatch>> {
    let bytes = storage.read_all(&entry.path)?;
    if hash_bytes(&bytes) != entry.checksum {
        return Err(Error::ChecksumMismatch {
            path: entry.path.clone(),
        });
    }
    codec::decode(bytes)
}

/// Streams a manifest's segments back as `RowBatch`es, in segment order.
///
/// Only one segment is decoded at a time.
pub struct SpillReader {
    storage: Arc<dyn Storage>,
    entries: VecDeque<SpillEntry>,
    pending: VecDeque<RowBatch>,
}

impl SpillReader {
    pub fn new(storage: Arc<dyn Storage>, manifest: &SpillManifest) -> Self {
        Self {
            storage,
            entries: manifest.segments.iter().cloned().collect(),
            pending: VecDeque::new(),
        }
    }

    /// Open the manifest persisted at `path`.
    pub fn open(storage: Arc<dyn Storage>, path: &str) -> Result<Self> {
        let manifest = SpillManager::load_manifest(storage.as_ref(), path)?;
        Ok(Self::new(storage, &manifest))
    }
}

impl Iterator for SpillReader {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Some(Ok(batch));
            }
            let entry = self.entries.pop_front()?;
            match read_segment(self.storage.as_ref(), &entry) {
                Ok(batches) => self.pending.extend(batches),
                Err(e) => {
                    self.entries.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
