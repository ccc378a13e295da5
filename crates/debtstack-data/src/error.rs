//! Error types for data operations.

use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur during filing acquisition and storage.
#[derive(Debug, Error)]
pub enum DataError {
    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SEC EDGAR API error
    #[error("EDGAR API error: {0}")]
    EdgarApi(String),

    /// CIK not found for ticker
    #[error("CIK not found for ticker: {0}")]
    CikNotFound(String),

    /// Filing not found
    #[error("Filing not found: {0}")]
    FilingNotFound(String),

    /// Invalid ticker or CIK input
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Source material absent (no exhibit, PDF-only filing, missing form)
    #[error("No data for {step}: {reason}")]
    NoData {
        /// Pipeline step that found nothing to work with
        step: String,
        /// Why the source is absent
        reason: String,
    },

    /// Another process holds the advisory lock for this company
    #[error("Company {0} is locked by another extraction run")]
    CompanyLocked(i64),

    /// Retries exhausted against an external service
    #[error("Retries exhausted for {operation}: {last_error}")]
    RetriesExhausted {
        /// Operation that kept failing
        operation: String,
        /// The final error message
        last_error: String,
    },
}

impl DataError {
    /// Whether this error is worth retrying at a higher level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RetriesExhausted { .. } | Self::CompanyLocked(_)
        )
    }
}
