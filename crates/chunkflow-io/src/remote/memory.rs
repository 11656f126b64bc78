use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;

use bytes::Bytes;

use chunkflow_core::error::{Error, Result};
use chunkflow_core::schema::Schema;

use super::RemoteBatchClient;
use crate::readers::parquet::parquet_schema;
use crate::readers::{DelimitedBatchReader, DelimitedFormat, ParquetRowGroupReader};
use crate::source::{BatchIter, DatasetFormat};

/// Object client backed by an in-process map of key → bytes.
#[derive(Debug, Default)]
pub struct InMemoryObjectClient {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, bytes: impl Into<Bytes>) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::Invariant("object map lock poisoned".into()))?
            .insert(key.into(), bytes.into());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .map_err(|_| Error::Invariant("object map lock poisoned".into()))?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object '{key}'")))
    }
}

impl RemoteBatchClient for InMemoryObjectClient {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|_| Error::Invariant("object map lock poisoned".into()))?
            .contains_key(key))
    }

    fn schema(&self, key: &str, format: DatasetFormat) -> Result<Schema> {
        let bytes = self.get(key)?;
        match format {
            DatasetFormat::Parquet => parquet_schema(&bytes),
            DatasetFormat::Delimited(fmt) => {
                Ok(DelimitedBatchReader::new(Cursor::new(bytes), fmt, None, 1)?.schema())
            }
        }
    }

    fn parquet_batches(
        &self,
        key: &str,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<BatchIter> {
        let bytes = self.get(key)?;
        Ok(Box::new(ParquetRowGroupReader::new(bytes, columns, batch_size)?))
    }

    fn delimited_batches(
        &self,
        key: &str,
        format: DelimitedFormat,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<BatchIter> {
        let bytes = self.get(key)?;
        Ok(Box::new(DelimitedBatchReader::new(
            Cursor::new(bytes),
            format,
            columns,
            batch_size,
        )?))
    }
}
