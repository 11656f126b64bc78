#![forbid(unsafe_code)]
//! chunkflow-io: batch sources, streaming readers, and spill storage backends.
//!
//! - `source`: the `BatchSource` capability with local and remote variants.
//! - `readers`: row-group parquet and delimited-text readers.
//! - `remote`: object-storage clients (S3 behind the `remote` feature).
//! - `storage`: `Storage` implementations used by the spill manager.

pub mod readers;
pub mod remote;
pub mod source;
pub mod storage;

pub use remote::{InMemoryObjectClient, RemoteBatchClient};
#[cfg(feature = "remote")]
pub use remote::{ObjectStoreClient, RemoteClientError};
pub use source::{
    BatchIter, BatchSource, BatchStream, DatasetFormat, LocalBatchSource, OpenOptions,
    RemoteBatchSource,
};
pub use storage::{build_storage_from_config, FsStorage, MemoryStorage};
