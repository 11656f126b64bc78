use thiserror::Error;

/// Canonical result for chunkflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every layer.
///
/// Layer crates may keep narrower enums internally but must map into one of
/// these kinds before an error crosses a public operation boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Dataset, object, or column absent. Fatal, no retry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unrecognized encoding or file extension. Raised before any batch is read.
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),

    /// Invalid configuration (unknown aggregation, zero ceiling, bad predicate).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The final result did not fit under the memory ceiling although an
    /// in-memory result was required. `manifest` points at the persisted
    /// spill manifest so the caller can switch to streamed consumption.
    #[error(
        "result of {required_bytes} bytes exceeds memory ceiling of {ceiling_bytes} bytes; spilled result recorded in {manifest}"
    )]
    ResourceExceeded {
        required_bytes: u64,
        ceiling_bytes: u64,
        manifest: String,
    },

    /// Mid-stream I/O failure with enough context to retry the whole operation.
    #[error("I/O failure on '{dataset}'{}: {message}", batch_suffix(.batch_index))]
    Io {
        dataset: String,
        batch_index: Option<usize>,
        message: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("operation cancelled after {batches} batches")]
    Cancelled { batches: usize },

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

fn batch_suffix(idx: &Option<usize>) -> String {
    match idx {
        Some(i) => format!(" at batch {i}"),
        None => String::new(),
    }
}

impl Error {
    /// Build an `Io` error without batch context (e.g. while opening).
    pub fn io(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Io {
            dataset: dataset.into(),
            batch_index: None,
            message: message.into(),
        }
    }

    /// Attach dataset/batch context to an `Io` error that lacks it.
    /// Other kinds pass through unchanged.
    pub fn with_batch_context(self, dataset: &str, batch: usize) -> Self {
        match self {
            Error::Io {
                dataset: ds,
                batch_index: None,
                message,
            } => Error::Io {
                dataset: if ds.is_empty() { dataset.to_string() } else { ds },
                batch_index: Some(batch),
                message,
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::io("", format!("json: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(e.to_string())
        } else {
            Error::io("", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_context_only_fills_missing_fields() {
        let e = Error::io("", "boom").with_batch_context("lineitem", 3);
        match e {
            Error::Io {
                dataset,
                batch_index,
                ..
            } => {
                assert_eq!(dataset, "lineitem");
                assert_eq!(batch_index, Some(3));
            }
            other => panic!("unexpected {other:?}"),
        }

        let e = Error::Config("x".into()).with_batch_context("lineitem", 3);
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn display_includes_batch() {
        let e = Error::Io {
            dataset: "orders".into(),
            batch_index: Some(7),
            message: "reset".into(),
        };
        assert_eq!(e.to_string(), "I/O failure on 'orders' at batch 7: reset");
    }
}
