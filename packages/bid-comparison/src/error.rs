//! Typed errors for the bid comparison library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Boxed error from an external collaborator (store, text extraction).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by persistence collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Optimistic version check failed
    #[error("version conflict (expected {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    /// Backend failure
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Errors raised by the completion gateway.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Configuration error (missing API key, invalid settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// API error (non-2xx response)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON envelope, no choices)
    #[error("parse error: {0}")]
    Parse(String),

    /// No usable credential or quota
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

impl CompletionError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Request timeouts (408) and rate limits (429) are retried along with
    /// 5xx responses; every other 4xx is a malformed request.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Config(_) | CompletionError::Unavailable(_) => false,
            CompletionError::Api { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            CompletionError::Network(_) | CompletionError::Parse(_) => true,
        }
    }
}

/// Errors that can occur while running a comparison.
#[derive(Debug, Error)]
pub enum ComparisonError {
    /// Completion gateway failed after retries
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// Model output did not decode into the stage's shape
    #[error("malformed {stage} response: {reason}")]
    Decode { stage: &'static str, reason: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Pipeline cannot start (no credential, no documents)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors returned by baseline edits and leveling.
#[derive(Debug, Error)]
pub enum LevelingError {
    /// Baseline quantity missing, zero or negative
    #[error("invalid baseline for '{item_key}': {reason}")]
    InvalidBaseline { item_key: String, reason: String },

    /// Another reviewer saved the baseline set first
    #[error("baseline set changed (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for LevelingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, found } => {
                LevelingError::VersionConflict { expected, found }
            }
            other => LevelingError::Storage(other),
        }
    }
}

/// Errors returned by the training export manager.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Nothing passed the filters and quality threshold
    #[error("no corrections qualified for export (fetched {fetched}, min score {min_score})")]
    NoQualifyingCorrections { fetched: usize, min_score: f64 },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// JSON serialization error
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for completion calls.
pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

/// Result type alias for comparison operations.
pub type Result<T> = std::result::Result<T, ComparisonError>;

/// Result type alias for leveling operations.
pub type LevelingResult<T> = std::result::Result<T, LevelingError>;

/// Result type alias for export operations.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CompletionError::Network("reset".into()).is_retryable());
        assert!(CompletionError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(CompletionError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!CompletionError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!CompletionError::Config("no key".into()).is_retryable());
    }

    #[test]
    fn test_store_conflict_maps_to_version_conflict() {
        let err: LevelingError = StoreError::Conflict { expected: 2, found: 3 }.into();
        assert!(matches!(err, LevelingError::VersionConflict { expected: 2, found: 3 }));
    }
}
