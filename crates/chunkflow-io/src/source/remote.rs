use std::sync::Arc;

use chunkflow_core::error::{Error, Result};
use chunkflow_core::schema::Schema;

use super::{BatchIter, BatchSource, BatchStream, DatasetFormat, HandleTracker, OpenOptions, Rechunk};
use crate::remote::RemoteBatchClient;

/// Adapts an object-storage client behind the `BatchSource` contract.
///
/// The client is passed in explicitly; there is no process-wide default.
#[derive(Clone)]
pub struct RemoteBatchSource {
    client: Arc<dyn RemoteBatchClient>,
    batch_size: usize,
    handles: HandleTracker,
}

impl RemoteBatchSource {
    pub fn new(client: Arc<dyn RemoteBatchClient>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        Ok(Self {
            client,
            batch_size,
            handles: HandleTracker::new(),
        })
    }

    pub fn client(&self) -> &Arc<dyn RemoteBatchClient> {
        &self.client
    }

    fn check_exists(&self, key: &str) -> Result<DatasetFormat> {
        let format = DatasetFormat::detect(key)?;
        if !self.client.exists(key)? {
            return Err(Error::NotFound(format!("object '{key}'")));
        }
        Ok(format)
    }
}

impl BatchSource for RemoteBatchSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn schema(&self, dataset: &str) -> Result<Schema> {
        let format = self.check_exists(dataset)?;
        self.client.schema(dataset, format)
    }

    fn open(&self, dataset: &str, options: &OpenOptions) -> Result<BatchStream> {
        let format = self.check_exists(dataset)?;
        let hint = options.parsed_hint()?;
        let read_cols = options.read_columns(hint.as_ref());

        let schema = self.client.schema(dataset, format)?;
        let wanted = read_cols
            .iter()
            .flatten()
            .chain(hint.as_ref().map(|h| &h.column));
        for col in wanted {
            if !schema.contains(col) {
                return Err(Error::NotFound(format!("column '{col}' in '{dataset}'")));
            }
        }

        let raw = match format {
            DatasetFormat::Parquet => {
                self.client
                    .parquet_batches(dataset, read_cols.as_deref(), self.batch_size)?
            }
            DatasetFormat::Delimited(fmt) => self.client.delimited_batches(
                dataset,
                fmt,
                read_cols.as_deref(),
                self.batch_size,
            )?,
        };
        let inner: BatchIter = Box::new(Rechunk::new(raw, self.batch_size));

        tracing::debug!(
            dataset,
            format = format.name(),
            batch_size = self.batch_size,
            "opened remote dataset"
        );

        let output = match (&options.columns, &read_cols) {
            (Some(cols), Some(read)) if read.len() != cols.len() => Some(cols.clone()),
            _ => None,
        };
        Ok(BatchStream::new(dataset, inner, self.handles.acquire()).with_filter(hint, output))
    }

    fn open_handles(&self) -> usize {
        self.handles.open_handles()
    }
}
