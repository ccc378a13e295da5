//! Error types for extraction.

use thiserror::Error;

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Errors raised by extractors, the QA agent and the fix planner.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Model-side error
    #[error(transparent)]
    Llm(#[from] debtstack_llm::LlmError),

    /// Data-side error
    #[error(transparent)]
    Data(#[from] debtstack_data::DataError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Extracted object failed structural or plausibility checks
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Source material absent for this extractor
    #[error("No data for {step}: {reason}")]
    NoData {
        /// Extraction step
        step: String,
        /// Why the source is absent
        reason: String,
    },
}

impl ExtractError {
    /// Map to the persisted error-taxonomy label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(e) if e.is_transient() => "transient_network",
            Self::Llm(_) => "llm_parse_error",
            Self::Data(e) if e.is_transient() => "transient_network",
            Self::Data(_) => "fatal",
            Self::Serialization(_) => "llm_parse_error",
            Self::Validation(_) => "validation_error",
            Self::NoData { .. } => "no_data",
        }
    }
}
