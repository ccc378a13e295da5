//! Error types for model calls.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to a model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider returned a non-success status
    #[error("{provider} API error (HTTP {status}): {message}")]
    Api {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// Provider asked us to slow down
    #[error("Rate limited; retry after {retry_after_ms}ms")]
    RateLimited {
        /// Provider hint (or backoff estimate) in milliseconds
        retry_after_ms: u64,
    },

    /// Model output could not be parsed into JSON even after repair
    #[error("Unparseable model output: {0}")]
    ParseFailure(String),

    /// Retries exhausted
    #[error("Model retries exhausted: {0}")]
    Exhausted(String),

    /// Response carried no content
    #[error("Empty model response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether the orchestrator should record this as a transient error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Exhausted(_)
        )
    }
}
