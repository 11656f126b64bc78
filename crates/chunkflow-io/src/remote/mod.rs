//! Remote object-storage clients that expose batch iteration.
//!
//! - `memory`: objects held in process memory (default build, tests).
//! - `s3`: S3-compatible endpoints (feature `remote`).

mod memory;
pub use memory::InMemoryObjectClient;

#[cfg(feature = "remote")]
mod s3;
#[cfg(feature = "remote")]
pub use self::s3::{ObjectStoreClient, RemoteClientError};

use chunkflow_core::error::Result;
use chunkflow_core::schema::Schema;

use crate::readers::DelimitedFormat;
use crate::source::{BatchIter, DatasetFormat};

/// Capability a remote storage client must provide to back a
/// `RemoteBatchSource`.
///
/// Implementations own their connection state; transient-error retries are
/// their responsibility, not the source's.
pub trait RemoteBatchClient: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool>;

    /// Column schema of an object, without reading rows.
    fn schema(&self, key: &str, format: DatasetFormat) -> Result<Schema>;

    /// Columnar scan; projected columns only.
    fn parquet_batches(
        &self,
        key: &str,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<BatchIter>;

    /// Delimited-text scan.
    fn delimited_batches(
        &self,
        key: &str,
        format: DelimitedFormat,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<BatchIter>;
}
