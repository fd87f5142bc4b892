//! Error types for recordlink

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A record property failed to evaluate, or the id was not a non-empty string.
    #[error("Projection error for record {record}: {message}")]
    Projection { record: String, message: String },

    /// A reader failed or produced malformed data.
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Storage backend failure. Transient failures are retried at the adapter boundary.
    #[error("Adapter error ({component}): {message}")]
    Adapter {
        component: String,
        message: String,
        transient: bool,
    },

    /// A block generator received a value of the wrong shape.
    #[error("Blocking error: {0}")]
    Blocking(String),

    /// Invalid configuration.
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Explicit lookup of something that does not exist.
    #[error("Not found: {0}")]
    Missing(String),

    /// Iteration requested more items than available.
    #[error("Iteration error: {0}")]
    Iteration(String),

    /// A block or ground-truth file violates its format.
    #[error("Format error in {source_name} at line {line}: {message}")]
    Format {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn projection(record: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Projection {
            record: record.into(),
            message: msg.into(),
        }
    }

    pub fn ingestion(msg: impl Into<String>) -> Self {
        Error::Ingestion(msg.into())
    }

    pub fn adapter(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Adapter {
            component: component.into(),
            message: msg.into(),
            transient: false,
        }
    }

    pub fn transient(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Adapter {
            component: component.into(),
            message: msg.into(),
            transient: true,
        }
    }

    pub fn blocking(msg: impl Into<String>) -> Self {
        Error::Blocking(msg.into())
    }

    pub fn parameter(msg: impl Into<String>) -> Self {
        Error::Parameter(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Error::Missing(msg.into())
    }

    pub fn format(source_name: impl Into<String>, line: usize, msg: impl Into<String>) -> Self {
        Error::Format {
            source_name: source_name.into(),
            line,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Adapter { transient, .. } => *transient,
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::transient("s3", "throttled").is_transient());
        assert!(!Error::adapter("s3", "access denied").is_transient());
        assert!(!Error::blocking("scalar expected").is_transient());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(io.is_transient());
    }

    #[test]
    fn test_format_error_message_names_line() {
        let err = Error::format("blocks.jsonl", 7, "expected a single-entry object");
        assert_eq!(
            err.to_string(),
            "Format error in blocks.jsonl at line 7: expected a single-entry object"
        );
    }
}
