//! Spill storage adapters implementing `chunkflow_mem::spill::Storage`.
//!
//! - `fs`: Local filesystem (default).
//! - `memory`: Process-local map, selected with `memory://`.
//!
//! The builder chooses the backend from the configured spill URI
//! (e.g. `file:///tmp/spill`, `memory://run`, or a bare directory).

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use chunkflow_core::config::StorageConfig;
use chunkflow_core::error::{Error, Result};
use chunkflow_mem::Storage;

/// Build the correct storage backend using the provided configuration.
pub fn build_storage_from_config(cfg: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match cfg.scheme() {
        None | Some("file") => Ok(Arc::new(FsStorage::new())),
        Some("memory") => Ok(Arc::new(MemoryStorage::new())),
        Some(other) => Err(Error::Config(format!(
            "unsupported spill scheme '{other}' (expected file:// or memory://)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_core::config::ProcessorConfig;

    #[test]
    fn scheme_selects_backend() {
        let cfg = ProcessorConfig {
            spill_uri: Some("memory://scratch".into()),
            ..Default::default()
        };
        let storage = build_storage_from_config(&cfg.storage_config()).unwrap();
        storage.write("memory://scratch/a", b"x").unwrap();
        assert_eq!(storage.size("memory://scratch/a").unwrap(), 1);
    }

    #[test]
    fn unknown_scheme_is_config_error() {
        let cfg = ProcessorConfig {
            spill_uri: Some("s3://bucket/prefix".into()),
            ..Default::default()
        };
        let err = build_storage_from_config(&cfg.storage_config())
            .err()
            .expect("s3 spill is not supported");
        assert!(err.to_string().contains("unsupported spill scheme"));
    }
}
