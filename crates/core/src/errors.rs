//! Error types

use thiserror::Error;

use crate::SourceKind;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Source name must not be empty")]
    EmptySourceName,
}

/// Price source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {source_name}")]
    Status { source_name: String, status: u16 },

    #[error("Invalid payload: {0}")]
    Decode(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("No valid prices returned")]
    EmptyResult,

    #[error("Missing credentials for {0}")]
    MissingCredentials(SourceKind),

    #[error("Unsupported source kind: {0}")]
    Unsupported(SourceKind),
}

/// Opportunity log errors
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type SourceResult<T> = Result<T, SourceError>;
pub type JournalResult<T> = Result<T, JournalError>;
