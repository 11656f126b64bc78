//! Processor configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression applied to spill segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpillCodec {
    None,
    #[default]
    Snappy,
    Zstd,
    Lz4,
}

impl std::str::FromStr for SpillCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(SpillCodec::None),
            "snappy" => Ok(SpillCodec::Snappy),
            "zstd" => Ok(SpillCodec::Zstd),
            "lz4" => Ok(SpillCodec::Lz4),
            other => Err(Error::Config(format!("unknown spill codec '{other}'"))),
        }
    }
}

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bucket URI, e.g. `s3://bucket/prefix`.
    pub uri: Option<String>,
    /// Custom endpoint for non-AWS providers.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub allow_http: bool,

    pub retry_max_retries: usize,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            uri: None,
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            retry_max_retries: 3,
            retry_initial_backoff_ms: 200,
            retry_max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Target rows per batch. Sources never yield more than this.
    pub batch_size: usize,

    /// Soft ceiling for accumulated results, in megabytes.
    pub max_memory_mb: u64,

    /// Directory for spill files (legacy local-path configuration).
    pub spill_dir: String,

    /// Optional fully-qualified spill URI (`file:///path` or `memory://`).
    pub spill_uri: Option<String>,

    pub spill_codec: SpillCodec,

    /// Upper bound on values kept for approximate quantiles.
    pub reservoir_capacity: usize,

    /// Values sampled from each batch while the reservoir has room.
    pub sample_per_batch: usize,

    /// Optional seed for reproducible reservoir samples.
    pub seed: Option<u64>,

    pub remote: RemoteConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            max_memory_mb: 2_048,
            spill_dir: std::env::temp_dir()
                .join("chunkflow-spill")
                .to_string_lossy()
                .into_owned(),
            spill_uri: None,
            spill_codec: SpillCodec::default(),
            reservoir_capacity: 10_000,
            sample_per_batch: 1_000,
            seed: None,
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uri: Option<String>,
    pub root: String,
}

impl StorageConfig {
    pub fn scheme(&self) -> Option<&str> {
        self.uri
            .as_deref()
            .and_then(|uri| uri.split_once("://").map(|(s, _)| s))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl ProcessorConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CHUNKFLOW_BATCH_SIZE`: rows per batch
    /// - `CHUNKFLOW_MAX_MEMORY_MB`: memory ceiling in megabytes
    /// - `CHUNKFLOW_SPILL_DIR` / `CHUNKFLOW_SPILL_URI`: spill target
    /// - `CHUNKFLOW_SPILL_CODEC`: none, snappy, zstd or lz4
    /// - `CHUNKFLOW_RESERVOIR_CAPACITY`, `CHUNKFLOW_SAMPLE_PER_BATCH`, `CHUNKFLOW_SEED`
    /// - `CHUNKFLOW_REMOTE_URI`, `CHUNKFLOW_REMOTE_ENDPOINT`, `CHUNKFLOW_REMOTE_REGION`,
    ///   `CHUNKFLOW_REMOTE_ACCESS_KEY_ID`, `CHUNKFLOW_REMOTE_SECRET_ACCESS_KEY`,
    ///   `CHUNKFLOW_REMOTE_ALLOW_HTTP`
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("CHUNKFLOW_BATCH_SIZE") {
            cfg.batch_size = v;
        }
        if let Some(v) = env_parse("CHUNKFLOW_MAX_MEMORY_MB") {
            cfg.max_memory_mb = v;
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_SPILL_DIR") {
            cfg.spill_dir = s;
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_SPILL_URI") {
            cfg.spill_uri = Some(s);
        }
        if let Some(v) = env_parse("CHUNKFLOW_SPILL_CODEC") {
            cfg.spill_codec = v;
        }
        if let Some(v) = env_parse("CHUNKFLOW_RESERVOIR_CAPACITY") {
            cfg.reservoir_capacity = v;
        }
        if let Some(v) = env_parse("CHUNKFLOW_SAMPLE_PER_BATCH") {
            cfg.sample_per_batch = v;
        }
        if let Some(v) = env_parse("CHUNKFLOW_SEED") {
            cfg.seed = Some(v);
        }

        if let Ok(s) = std::env::var("CHUNKFLOW_REMOTE_URI") {
            cfg.remote.uri = Some(s);
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_REMOTE_ENDPOINT") {
            cfg.remote.endpoint = Some(s);
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_REMOTE_REGION") {
            cfg.remote.region = Some(s);
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_REMOTE_ACCESS_KEY_ID") {
            cfg.remote.access_key_id = Some(s);
        }
        if let Ok(s) = std::env::var("CHUNKFLOW_REMOTE_SECRET_ACCESS_KEY") {
            cfg.remote.secret_access_key = Some(s);
        }
        if let Some(v) = env_parse("CHUNKFLOW_REMOTE_ALLOW_HTTP") {
            cfg.remote.allow_http = v;
        }
        if let Some(v) = env_parse("CHUNKFLOW_REMOTE_RETRY_MAX_RETRIES") {
            cfg.remote.retry_max_retries = v;
        }

        cfg
    }

    /// Reject settings that would make every operation fail or loop.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        if self.max_memory_mb == 0 {
            return Err(Error::Config("max_memory_mb must be > 0".into()));
        }
        if self.reservoir_capacity == 0 {
            return Err(Error::Config("reservoir_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Produce a storage configuration snapshot used by the spill layer.
    pub fn storage_config(&self) -> StorageConfig {
        let scheme = self
            .spill_uri
            .as_deref()
            .and_then(|uri| uri.split_once("://").map(|(s, _)| s.trim().to_string()))
            .filter(|s| !s.is_empty());

        let root = match (scheme.as_deref(), self.spill_uri.as_ref()) {
            (Some("file"), Some(uri)) => {
                file_uri_to_path(uri).unwrap_or_else(|| self.spill_dir.clone())
            }
            (Some(_), Some(uri)) => uri.trim_end_matches('/').to_string(),
            _ => self.spill_dir.clone(),
        };

        StorageConfig {
            uri: self.spill_uri.clone(),
            root,
        }
    }
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ProcessorConfig::default();
        assert_eq!(cfg.batch_size, 100_000);
        assert_eq!(cfg.max_memory_mb, 2_048);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_ceiling_rejected() {
        let cfg = ProcessorConfig {
            max_memory_mb: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn storage_root_from_file_uri() {
        let cfg = ProcessorConfig {
            spill_uri: Some("file:///var/tmp/spill".into()),
            ..Default::default()
        };
        let sc = cfg.storage_config();
        assert_eq!(sc.scheme(), Some("file"));
        assert_eq!(sc.root, "/var/tmp/spill");

        let bare = ProcessorConfig {
            spill_dir: "/tmp/x".into(),
            ..Default::default()
        }
        .storage_config();
        assert_eq!(bare.scheme(), None);
        assert_eq!(bare.root, "/tmp/x");
    }

    #[test]
    fn codec_parses_case_insensitively() {
        assert_eq!("ZSTD".parse::<SpillCodec>().unwrap(), SpillCodec::Zstd);
        assert!("brotli".parse::<SpillCodec>().is_err());
    }
}
