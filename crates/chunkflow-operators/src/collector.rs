//! Accumulates operator output under a memory ceiling, spilling to
//! compressed columnar segments when the governor says so.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::manifest::SpillManifest;
use chunkflow_core::types::RowBatch;
use chunkflow_mem::{Codec, MemoryGovernor, SpillManager, SpillReader, Storage};

/// What the caller wants back from a filter or projection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// A single batch; only valid when every match fits under the ceiling.
    #[default]
    InMemory,
    /// Everything is persisted; the manifest is returned.
    Spilled,
}

/// Where and how spill segments are written.
#[derive(Clone)]
pub struct SpillTarget {
    pub storage: Arc<dyn Storage>,
    pub codec: Codec,
    pub root_dir: String,
}

impl SpillTarget {
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, root_dir: impl Into<String>) -> Self {
        Self {
            storage,
            codec,
            root_dir: root_dir.into(),
        }
    }
}

impl fmt::Debug for SpillTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillTarget")
            .field("codec", &self.codec)
            .field("root_dir", &self.root_dir)
            .finish()
    }
}

/// Result of a spilled pass: the persisted manifest plus the storage holding it.
pub struct SpilledResult {
    pub manifest: SpillManifest,
    pub manifest_path: String,
    storage: Arc<dyn Storage>,
}

impl SpilledResult {
    pub fn total_rows(&self) -> u64 {
        self.manifest.total_rows
    }

    /// Stream the segments back in write order.
    pub fn reader(&self) -> SpillReader {
        SpillReader::new(Arc::clone(&self.storage), &self.manifest)
    }

    /// Read every segment into one batch. Callers are responsible for
    /// making sure that fits in memory.
    pub fn read_all(&self) -> Result<RowBatch> {
        let batches = self.reader().collect::<std::result::Result<Vec<_>, _>>()?;
        RowBatch::concat_rows(&batches)
    }

    /// Delete the segments and the manifest file.
    pub fn cleanup(self) -> Result<()> {
        for entry in &self.manifest.segments {
            self.storage.delete(&entry.path)?;
        }
        self.storage.delete(&self.manifest_path)?;
        Ok(())
    }
}

impl fmt::Debug for SpilledResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpilledResult")
            .field("manifest_path", &self.manifest_path)
            .field("segments", &self.manifest.segments.len())
            .field("total_rows", &self.manifest.total_rows)
            .finish()
    }
}

#[derive(Debug)]
pub enum CollectOutput {
    InMemory(RowBatch),
    Spilled(SpilledResult),
}

impl CollectOutput {
    pub fn in_memory(self) -> Option<RowBatch> {
        match self {
            CollectOutput::InMemory(b) => Some(b),
            CollectOutput::Spilled(_) => None,
        }
    }

    pub fn spilled(self) -> Option<SpilledResult> {
        match self {
            CollectOutput::Spilled(s) => Some(s),
            CollectOutput::InMemory(_) => None,
        }
    }

    /// Materialize the result regardless of mode.
    pub fn into_batch(self) -> Result<RowBatch> {
        match self {
            CollectOutput::InMemory(b) => Ok(b),
            CollectOutput::Spilled(s) => s.read_all(),
        }
    }
}

/// Batch accumulator shared by the filter and projection passes.
///
/// Batches are buffered until the governor reports the buffered estimate
/// over the ceiling; the buffer is then written as one segment and cleared.
pub struct SpillingCollector {
    governor: MemoryGovernor,
    target: SpillTarget,
    dataset: String,
    mode: OutputMode,
    columns: Option<Vec<String>>,
    buffered: Vec<RowBatch>,
    buffered_bytes: u64,
    total_bytes: u64,
    manager: Option<SpillManager>,
}

impl SpillingCollector {
    pub fn new(
        governor: MemoryGovernor,
        target: SpillTarget,
        dataset: impl Into<String>,
        mode: OutputMode,
    ) -> Self {
        Self {
            governor,
            target,
            dataset: dataset.into(),
            mode,
            columns: None,
            buffered: Vec::new(),
            buffered_bytes: 0,
            total_bytes: 0,
            manager: None,
        }
    }

    /// Column names reported for an empty result.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn spill_count(&self) -> usize {
        self.manager.as_ref().map_or(0, SpillManager::segment_count)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.governor.peak_bytes()
    }

    pub fn push(&mut self, batch: RowBatch) -> Result<()> {
        if self.columns.is_none() {
            self.columns = Some(batch.column_names());
        }
        if batch.is_empty() {
            return Ok(());
        }
        let bytes = batch.estimated_bytes() as u64;
        self.buffered_bytes += bytes;
        self.total_bytes += bytes;
        self.buffered.push(batch);

        if self.governor.observe(self.buffered_bytes) {
            self.spill()?;
        } else if let Some(manager) = self.manager.as_mut() {
            manager.set_pending_merge(true);
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let combined = RowBatch::concat_rows(&self.buffered)?;
        let target = &self.target;
        let dataset = &self.dataset;
        let manager = self.manager.get_or_insert_with(|| {
            SpillManager::new(
                Arc::clone(&target.storage),
                target.codec,
                &target.root_dir,
                dataset.clone(),
            )
        });
        manager.write_batch(&combined)?;
        manager.set_pending_merge(false);
        tracing::debug!(
            dataset = %self.dataset,
            buffered_bytes = self.buffered_bytes,
            ceiling_bytes = self.governor.ceiling_bytes(),
            "buffer exceeded ceiling; spilled"
        );
        self.buffered.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    fn empty_batch(&self) -> RowBatch {
        RowBatch::empty(self.columns.as_deref().unwrap_or_default())
    }

    pub fn finish(mut self) -> Result<CollectOutput> {
        match self.mode {
            OutputMode::InMemory if self.manager.is_none() => {
                if self.buffered.is_empty() {
                    return Ok(CollectOutput::InMemory(self.empty_batch()));
                }
                Ok(CollectOutput::InMemory(RowBatch::concat_rows(&self.buffered)?))
            }
            OutputMode::InMemory => {
                self.spill()?;
                let manifest = self.persist()?.1;
                Err(Error::ResourceExceeded {
                    required_bytes: self.total_bytes,
                    ceiling_bytes: self.governor.ceiling_bytes(),
                    manifest,
                })
            }
            OutputMode::Spilled => {
                self.spill()?;
                let (manifest, manifest_path) = self.persist()?;
                Ok(CollectOutput::Spilled(SpilledResult {
                    manifest,
                    manifest_path,
                    storage: Arc::clone(&self.target.storage),
                }))
            }
        }
    }

    fn persist(&mut self) -> Result<(SpillManifest, String)> {
        let target = &self.target;
        let dataset = &self.dataset;
        let manager = self.manager.get_or_insert_with(|| {
            SpillManager::new(
                Arc::clone(&target.storage),
                target.codec,
                &target.root_dir,
                dataset.clone(),
            )
        });
        let path = manager.persist_manifest()?;
        Ok((manager.manifest().clone(), path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chunkflow_core::types::{Column, Scalar};
    use chunkflow_mem::error::Error as MemError;

    /// In-process storage for operator tests.
    #[derive(Default)]
    pub(crate) struct MapStorage(Mutex<HashMap<String, Vec<u8>>>);

    impl Storage for MapStorage {
        fn write(&self, path: &str, data: &[u8]) -> chunkflow_mem::error::Result<()> {
            self.0.lock().unwrap().insert(path.to_string(), data.to_vec());
            Ok(())
        }

        fn read_range(
            &self,
            path: &str,
            offset: u64,
            len: usize,
        ) -> chunkflow_mem::error::Result<Vec<u8>> {
            let map = self.0.lock().unwrap();
            let data = map
                .get(path)
                .ok_or_else(|| MemError::NotFound(path.to_string()))?;
            let start = (offset as usize).min(data.len());
            let end = (start + len).min(data.len());
            Ok(data[start..end].to_vec())
        }

        fn delete(&self, path: &str) -> chunkflow_mem::error::Result<()> {
            self.0.lock().unwrap().remove(path);
            Ok(())
        }

        fn list(&self, prefix: &str) -> chunkflow_mem::error::Result<Vec<String>> {
            let mut keys: Vec<String> = self
                .0
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }

        fn size(&self, path: &str) -> chunkflow_mem::error::Result<u64> {
            self.0
                .lock()
                .unwrap()
                .get(path)
                .map(|d| d.len() as u64)
                .ok_or_else(|| MemError::NotFound(path.to_string()))
        }

        fn etag(&self, _path: &str) -> chunkflow_mem::error::Result<Option<String>> {
            Ok(None)
        }
    }

    pub(crate) fn target() -> SpillTarget {
        SpillTarget::new(Arc::new(MapStorage::default()), Codec::Snappy, "spill")
    }

    fn batch(vals: &[i64]) -> RowBatch {
        RowBatch::try_new(vec![Column::new(
            "v",
            vals.iter().copied().map(Scalar::I64).collect(),
        )])
        .unwrap()
    }

    #[test]
    fn in_memory_when_under_ceiling() {
        let mut c = SpillingCollector::new(
            MemoryGovernor::with_ceiling_bytes(1 << 20),
            target(),
            "t",
            OutputMode::InMemory,
        );
        c.push(batch(&[1, 2])).unwrap();
        c.push(batch(&[3])).unwrap();
        assert_eq!(c.spill_count(), 0);
        let out = c.finish().unwrap().in_memory().unwrap();
        assert_eq!(out.num_rows(), 3);
    }

    #[test]
    fn spilled_mode_preserves_rows_in_order() {
        let mut c = SpillingCollector::new(
            MemoryGovernor::with_ceiling_bytes(20),
            target(),
            "t",
            OutputMode::Spilled,
        );
        for chunk in [[1, 2], [3, 4], [5, 6]] {
            c.push(batch(&chunk)).unwrap();
        }
        assert!(c.spill_count() >= 1);
        let spilled = c.finish().unwrap().spilled().unwrap();
        assert_eq!(spilled.total_rows(), 6);
        assert!(!spilled.manifest.pending_merge);
        let all = spilled.read_all().unwrap();
        assert_eq!(all.columns[0].values, batch(&[1, 2, 3, 4, 5, 6]).columns[0].values);
    }

    #[test]
    fn in_memory_after_spill_reports_manifest() {
        let mut c = SpillingCollector::new(
            MemoryGovernor::with_ceiling_bytes(10),
            target(),
            "orders",
            OutputMode::InMemory,
        );
        c.push(batch(&[1, 2, 3])).unwrap();
        match c.finish() {
            Err(Error::ResourceExceeded {
                ceiling_bytes,
                manifest,
                ..
            }) => {
                assert_eq!(ceiling_bytes, 10);
                assert!(manifest.ends_with("manifest.json"));
            }
            other => panic!("expected ResourceExceeded, got {other:?}"),
        }
    }

    #[test]
    fn empty_result_keeps_column_names() {
        let mut c = SpillingCollector::new(
            MemoryGovernor::with_ceiling_bytes(1 << 20),
            target(),
            "t",
            OutputMode::InMemory,
        );
        c.push(batch(&[])).unwrap();
        let out = c.finish().unwrap().in_memory().unwrap();
        assert!(out.is_empty());
        assert_eq!(out.column_names(), vec!["v"]);
    }
}
