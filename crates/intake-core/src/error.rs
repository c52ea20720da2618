//! Error types for the fetch cursor protocol.

use thiserror::Error;

/// Errors raised while fetching a page from a vendor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout or 5xx. The same request may be retried next cycle.
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    /// 4xx or a malformed response. The stream's cycle is aborted.
    #[error("Fatal fetch failure: {0}")]
    Fatal(String),

    /// The shared client is unusable (connection refused, bad credentials).
    /// Aborts the current stream and every stream after it.
    #[error("Connection failure: {0}")]
    Connection(String),
}

impl FetchError {
    /// Returns true if the error is retryable on the next scheduled cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Returns true if sibling streams must not be attempted after this error.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, FetchError::Connection(_))
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// A vendor record that lacks a usable `id` or `timestamp`.
///
/// Never fatal: the record is dropped and the cycle continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed record: field '{field}' {reason}")]
pub struct MalformedRecordError {
    /// The offending field name.
    pub field: String,
    /// What was wrong with it.
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the persisted state store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("State store I/O error: {0}")]
    Io(String),

    /// A stored blob could not be (de)serialized.
    #[error("State serialization error: {0}")]
    Serialization(String),
}

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the downstream ingestion sink.
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    /// The sink refused or failed to accept the batch.
    #[error("Event sink rejected batch: {0}")]
    Rejected(String),

    /// Writing to the sink failed.
    #[error("Event sink I/O error: {0}")]
    Io(String),
}

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// A time expression (first-fetch lookback, date argument) could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid time expression: '{0}'")]
pub struct TimeParseError(pub String);

/// Errors surfaced by a collection cycle.
#[derive(Error, Debug, Clone)]
pub enum CollectorError {
    /// One or more streams failed. Carries a single consolidated message.
    #[error("Collection cycle failed: {message}")]
    CycleFailed { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result type for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Transient("503".into()).is_transient());
        assert!(!FetchError::Fatal("400".into()).is_transient());
        assert!(FetchError::Connection("refused".into()).is_connection_level());
        assert!(!FetchError::Fatal("400".into()).is_connection_level());
    }

    #[test]
    fn test_error_display() {
        let err = MalformedRecordError::new("_id", "is missing");
        assert_eq!(err.to_string(), "Malformed record: field '_id' is missing");

        let err = CollectorError::CycleFailed {
            message: "alert: Fatal fetch failure: 400".to_string(),
        };
        assert!(err.to_string().contains("alert: Fatal fetch failure"));

        let err: CollectorError = StoreError::Io("disk full".into()).into();
        assert!(err.to_string().contains("disk full"));
    }
}
