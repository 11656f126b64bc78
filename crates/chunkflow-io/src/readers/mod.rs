//! Streaming readers that produce small `RowBatch` chunks.
//!
//! Both readers are plain iterators over `Result<RowBatch>`; sources wrap them
//! in a `BatchStream` for handle accounting and error context.

pub mod delimited;
pub mod parquet;

pub use self::delimited::{DelimitedBatchReader, DelimitedFormat};
pub use self::parquet::{ParquetRowGroupReader, SharedFile};

use chunkflow_core::error::Error;

pub(crate) fn io_err(e: impl std::fmt::Display) -> Error {
    Error::io("", e.to_string())
}
