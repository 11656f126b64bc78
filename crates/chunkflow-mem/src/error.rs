use thiserror::Error;

/// Result type local to chunkflow-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("spill storage error: {0}")]
    Storage(String),

    #[error("spill object not found: {0}")]
    NotFound(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch for segment '{path}'")]
    ChecksumMismatch { path: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error(transparent)]
    Core(#[from] chunkflow_core::error::Error),
}

impl From<Error> for chunkflow_core::error::Error {
    fn from(e: Error) -> Self {
        use chunkflow_core::error::Error as CoreError;
        match e {
            Error::Core(inner) => inner,
            Error::NotFound(p) => CoreError::NotFound(p),
            other => CoreError::io("", other.to_string()),
        }
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Codec(format!("parquet: {e}"))
    }
}
