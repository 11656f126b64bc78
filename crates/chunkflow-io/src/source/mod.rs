//! The batch-source capability and the stream it produces.
//!
//! A source turns a dataset identifier into a lazy, forward-only sequence of
//! `RowBatch`. Local and remote sources implement the same trait; callers
//! pick one at construction time.

mod local;
mod rechunk;
mod remote;

pub use local::LocalBatchSource;
pub use rechunk::Rechunk;
pub use remote::RemoteBatchSource;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::expr::SimplePredicate;
use chunkflow_core::schema::Schema;
use chunkflow_core::types::RowBatch;

use crate::readers::DelimitedFormat;

/// Boxed batch iterator produced by readers and remote clients.
pub type BatchIter = Box<dyn Iterator<Item = Result<RowBatch>> + Send>;

/// Per-call options for `BatchSource::open`.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Column projection; `None` reads every column.
    pub columns: Option<Vec<String>>,
    /// Simple predicate (`"col op literal"`) applied to every yielded batch.
    pub filter_hint: Option<String>,
}

impl OpenOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_columns<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(cols.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter_hint(mut self, hint: impl Into<String>) -> Self {
        self.filter_hint = Some(hint.into());
        self
    }

    /// Parse the filter hint. An unparsable hint is a `Config` error.
    pub fn parsed_hint(&self) -> Result<Option<SimplePredicate>> {
        self.filter_hint
            .as_deref()
            .map(SimplePredicate::parse)
            .transpose()
    }

    /// Columns a reader must decode: the projection plus the hint column.
    pub(crate) fn read_columns(&self, hint: Option<&SimplePredicate>) -> Option<Vec<String>> {
        let mut cols = self.columns.clone().filter(|c| !c.is_empty())?;
        if let Some(h) = hint {
            if !cols.contains(&h.column) {
                cols.push(h.column.clone());
            }
        }
        Some(cols)
    }
}

/// Encoding of a dataset, decided from its identifier's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetFormat {
    Parquet,
    Delimited(DelimitedFormat),
}

impl DatasetFormat {
    /// `.parquet` → columnar; `.tbl` → `|`-delimited without header;
    /// `.dat`/`.csv` → `,`-delimited with header. Identifiers without an
    /// extension are treated as parquet.
    pub fn detect(dataset: &str) -> Result<Self> {
        let ext = Path::new(dataset)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            None | Some("parquet") => Ok(DatasetFormat::Parquet),
            Some("tbl") => Ok(DatasetFormat::Delimited(DelimitedFormat::tbl())),
            Some("dat") | Some("csv") => Ok(DatasetFormat::Delimited(DelimitedFormat::csv())),
            Some(other) => Err(Error::FormatUnsupported(format!(
                "'{dataset}': unrecognized extension '.{other}'"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatasetFormat::Parquet => "parquet",
            DatasetFormat::Delimited(f) if f.delimiter == b'|' => "tbl",
            DatasetFormat::Delimited(_) => "csv",
        }
    }
}

/// Source-agnostic batch iteration.
pub trait BatchSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Target rows per batch; no yielded batch is larger.
    fn batch_size(&self) -> usize;

    /// Column schema of `dataset`, without reading rows.
    fn schema(&self, dataset: &str) -> Result<Schema>;

    /// Open a lazy batch sequence. Missing datasets/columns, unsupported
    /// formats, and bad filter hints fail here, before any batch is read.
    fn open(&self, dataset: &str, options: &OpenOptions) -> Result<BatchStream>;

    /// Streams opened by this source and not yet dropped or exhausted.
    fn open_handles(&self) -> usize;
}

/// Counts live handles held by open streams.
#[derive(Debug, Clone, Default)]
pub struct HandleTracker {
    open: Arc<AtomicUsize>,
}

impl HandleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> HandleGuard {
        self.open.fetch_add(1, Ordering::AcqRel);
        HandleGuard {
            open: Arc::clone(&self.open),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

/// RAII handle; dropping it releases the count.
#[derive(Debug)]
pub struct HandleGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Lazy, finite, non-restartable sequence of batches from one dataset.
///
/// Owns the underlying reader and a handle guard. Both are released when the
/// stream is exhausted, fails, or is dropped early.
pub struct BatchStream {
    dataset: String,
    inner: Option<BatchIter>,
    guard: Option<HandleGuard>,
    filter: Option<SimplePredicate>,
    /// Final projection when the hint column was read only for filtering.
    output_columns: Option<Vec<String>>,
    batch_index: usize,
}

impl BatchStream {
    pub fn new(dataset: impl Into<String>, inner: BatchIter, guard: HandleGuard) -> Self {
        Self {
            dataset: dataset.into(),
            inner: Some(inner),
            guard: Some(guard),
            filter: None,
            output_columns: None,
            batch_index: 0,
        }
    }

    pub(crate) fn with_filter(
        mut self,
        filter: Option<SimplePredicate>,
        output_columns: Option<Vec<String>>,
    ) -> Self {
        self.filter = filter;
        self.output_columns = output_columns;
        self
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Batches yielded so far.
    pub fn batches_read(&self) -> usize {
        self.batch_index
    }

    fn release(&mut self) {
        self.inner = None;
        self.guard = None;
    }

    fn finish_batch(&self, batch: RowBatch) -> Result<RowBatch> {
        let batch = match &self.filter {
            Some(pred) => {
                let mask = pred.evaluate(&batch)?;
                batch.filter(&mask)?
            }
            None => batch,
        };
        match &self.output_columns {
            Some(cols) if batch.columns.len() != cols.len() => batch.project(cols),
            _ => Ok(batch),
        }
    }
}

impl Iterator for BatchStream {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.inner.as_mut()?.next();
            match next {
                None => {
                    self.release();
                    return None;
                }
                Some(Err(e)) => {
                    let e = e.with_batch_context(&self.dataset, self.batch_index);
                    self.release();
                    return Some(Err(e));
                }
                Some(Ok(batch)) => {
                    let had_rows = !batch.is_empty();
                    match self.finish_batch(batch) {
                        Ok(b) if had_rows && b.is_empty() => continue,
                        Ok(b) => {
                            self.batch_index += 1;
                            return Some(Ok(b));
                        }
                        Err(e) => {
                            let e = e.with_batch_context(&self.dataset, self.batch_index);
                            self.release();
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("dataset", &self.dataset)
            .field("batch_index", &self.batch_index)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
