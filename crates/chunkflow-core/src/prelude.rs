//! Convenient re-exports for downstream crates.

pub use crate::cancel::CancellationToken;
pub use crate::config::{ProcessorConfig, RemoteConfig, SpillCodec, StorageConfig};
pub use crate::error::{Error, Result};
pub use crate::expr::{Predicate, SimplePredicate};
pub use crate::id::SpillId;
pub use crate::manifest::{ManifestId, SpillEntry, SpillManifest};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, GroupKey, RowBatch, Scalar};
