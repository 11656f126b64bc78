//! Row-group-at-a-time parquet scans with column projection.
//!
//! Metadata is read once. Each row group is then decoded on demand, and only
//! the projected column chunks are fetched from the underlying reader.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReader,
    ParquetRecordBatchReaderBuilder,
};
use parquet::arrow::ProjectionMask;
use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, Length};

use chunkflow_core::arrow::{logical_schema, record_batch_to_rows};
use chunkflow_core::error::{Error, Result};
use chunkflow_core::schema::Schema;
use chunkflow_core::types::RowBatch;

use super::io_err;

/// A file handle that can be shared between row-group readers.
#[derive(Debug, Clone)]
pub struct SharedFile(Arc<File>);

impl SharedFile {
    pub fn new(file: File) -> Self {
        Self(Arc::new(file))
    }
}

impl Length for SharedFile {
    fn len(&self) -> u64 {
        self.0.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

impl ChunkReader for SharedFile {
    type T = BufReader<File>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let mut f = self.0.try_clone()?;
        f.seek(SeekFrom::Start(start))?;
        Ok(BufReader::new(f))
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        let mut buffer = Vec::with_capacity(length);
        self.get_read(start)?
            .take(length as u64)
            .read_to_end(&mut buffer)?;
        if buffer.len() != length {
            return Err(ParquetError::EOF(format!(
                "expected {length} bytes at offset {start}, got {}",
                buffer.len()
            )));
        }
        Ok(buffer.into())
    }
}

/// Read and decode the footer. A footer that cannot be decoded means the
/// input is not parquet we understand (`FormatUnsupported`); failures of
/// the underlying reader stay I/O errors.
fn load_metadata<R: ChunkReader>(input: &R) -> Result<ArrowReaderMetadata> {
    ArrowReaderMetadata::load(input, ArrowReaderOptions::new()).map_err(|e| match e {
        ParquetError::External(_) => io_err(e),
        other => Error::FormatUnsupported(format!("unreadable parquet footer: {other}")),
    })
}

/// Logical schema of a parquet input, from its footer only.
pub fn parquet_schema<R: ChunkReader>(input: &R) -> Result<Schema> {
    Ok(logical_schema(load_metadata(input)?.schema()))
}

pub struct ParquetRowGroupReader<R: ChunkReader + Clone + 'static> {
    input: R,
    metadata: ArrowReaderMetadata,
    mask: ProjectionMask,
    /// Requested output order, when projecting.
    columns: Option<Vec<String>>,
    batch_size: usize,
    next_row_group: usize,
    current: Option<ParquetRecordBatchReader>,
}

impl<R: ChunkReader + Clone + 'static> ParquetRowGroupReader<R> {
    /// Read the footer and validate the projection. Missing columns are
    /// `NotFound` before any row group is touched.
    pub fn new(input: R, columns: Option<&[String]>, batch_size: usize) -> Result<Self> {
        let metadata = load_metadata(&input)?;

        let (mask, columns) = match columns {
            Some(cols) if !cols.is_empty() => {
                let arrow_schema = metadata.schema();
                let mut indices = Vec::with_capacity(cols.len());
                for c in cols {
                    let idx = arrow_schema
                        .index_of(c)
                        .map_err(|_| Error::NotFound(format!("column '{c}'")))?;
                    indices.push(idx);
                }
                let descr = metadata.metadata().file_metadata().schema_descr();
                (ProjectionMask::roots(descr, indices), Some(cols.to_vec()))
            }
            _ => (ProjectionMask::all(), None),
        };

        Ok(Self {
            input,
            metadata,
            mask,
            columns,
            batch_size: batch_size.max(1),
            next_row_group: 0,
            current: None,
        })
    }

    pub fn schema(&self) -> Schema {
        logical_schema(self.metadata.schema())
    }

    pub fn num_row_groups(&self) -> usize {
        self.metadata.metadata().num_row_groups()
    }

    fn open_next_row_group(&mut self) -> Result<bool> {
        if self.next_row_group >= self.num_row_groups() {
            return Ok(false);
        }
        let rg = self.next_row_group;
        self.next_row_group += 1;
        let reader =
            ParquetRecordBatchReaderBuilder::new_with_metadata(self.input.clone(), self.metadata.clone())
                .with_row_groups(vec![rg])
                .with_projection(self.mask.clone())
                .with_batch_size(self.batch_size)
                .build()
                .map_err(io_err)?;
        self.current = Some(reader);
        Ok(true)
    }
}

impl<R: ChunkReader + Clone + 'static> Iterator for ParquetRowGroupReader<R> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next() {
                    Some(Ok(rb)) => {
                        let rows = record_batch_to_rows(&rb).and_then(|b| match &self.columns {
                            Some(cols) => b.project(cols),
                            None => Ok(b),
                        });
                        return Some(rows);
                    }
                    Some(Err(e)) => {
                        self.current = None;
                        self.next_row_group = usize::MAX;
                        return Some(Err(io_err(e)));
                    }
                    None => self.current = None,
                }
            }
            match self.open_next_row_group() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.next_row_group = usize::MAX;
                    return Some(Err(e));
                }
            }
        }
    }
}
