use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chunkflow_core::error::{Error, Result};
use chunkflow_core::schema::Schema;

use super::{BatchIter, BatchSource, BatchStream, DatasetFormat, HandleTracker, OpenOptions};
use crate::readers::parquet::parquet_schema;
use crate::readers::{DelimitedBatchReader, ParquetRowGroupReader, SharedFile};

/// Reads datasets from a local directory.
///
/// Parquet files are scanned one row group at a time; delimited files are
/// streamed record by record. Identifiers without an extension get
/// `.parquet` appended.
#[derive(Debug, Clone)]
pub struct LocalBatchSource {
    data_dir: PathBuf,
    batch_size: usize,
    handles: HandleTracker,
}

impl LocalBatchSource {
    pub fn new(data_dir: impl Into<PathBuf>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        Ok(Self {
            data_dir: data_dir.into(),
            batch_size,
            handles: HandleTracker::new(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolve an identifier to a path and format.
    pub fn resolve(&self, dataset: &str) -> Result<(PathBuf, DatasetFormat)> {
        let mut path = self.data_dir.join(dataset);
        if path.extension().is_none() {
            path.set_extension("parquet");
        }
        let format = DatasetFormat::detect(&path.to_string_lossy())?;
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "dataset '{dataset}' ({})",
                path.display()
            )));
        }
        Ok((path, format))
    }

    fn open_file(path: &Path) -> Result<File> {
        File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::io(path.display().to_string(), e.to_string())
            }
        })
    }
}

impl BatchSource for LocalBatchSource {
    fn name(&self) -> &'static str {
        "local"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn schema(&self, dataset: &str) -> Result<Schema> {
        let (path, format) = self.resolve(dataset)?;
        let file = Self::open_file(&path)?;
        match format {
            DatasetFormat::Parquet => parquet_schema(&SharedFile::new(file)),
            DatasetFormat::Delimited(fmt) => {
                Ok(DelimitedBatchReader::new(BufReader::new(file), fmt, None, 1)?.schema())
            }
        }
    }

    fn open(&self, dataset: &str, options: &OpenOptions) -> Result<BatchStream> {
        let (path, format) = self.resolve(dataset)?;
        let hint = options.parsed_hint()?;
        let read_cols = options.read_columns(hint.as_ref());
        let file = Self::open_file(&path)?;

        let inner: BatchIter = match format {
            DatasetFormat::Parquet => Box::new(ParquetRowGroupReader::new(
                SharedFile::new(file),
                read_cols.as_deref(),
                self.batch_size,
            )?),
            DatasetFormat::Delimited(fmt) => Box::new(DelimitedBatchReader::new(
                BufReader::new(file),
                fmt,
                read_cols.as_deref(),
                self.batch_size,
            )?),
        };

        // A hint on a column outside the projection must exist too.
        if let (Some(h), None) = (&hint, &read_cols) {
            let schema = self.schema(dataset)?;
            if !schema.contains(&h.column) {
                return Err(Error::NotFound(format!("column '{}'", h.column)));
            }
        }

        tracing::debug!(
            dataset,
            path = %path.display(),
            format = format.name(),
            batch_size = self.batch_size,
            "opened local dataset"
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
