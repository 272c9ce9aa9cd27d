//! Error Types for Plant Advisor

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Invalid N-P-K ratio: {0}")]
    InvalidRatio(String),

    #[error("Invalid fertilizer product: {0}")]
    InvalidProduct(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid pH: {0}")]
    InvalidPh(String),

    #[error("Unknown soil type '{0}' (expected sand, loam or clay)")]
    UnknownSoilType(String),

    #[error("Unknown nutrient '{0}' (expected N, P or K)")]
    UnknownNutrient(String),

    #[error("Search query must not be empty")]
    EmptyQuery,

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Knowledge base lookup timed out after {0}s")]
    Timeout(u64),

    #[error("Unsupported document type: {0}")]
    UnsupportedFile(String),

    #[error("Document {0} has no text content")]
    EmptyDocument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdvisorError {
    /// Failures worth another attempt
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::Timeout(_))
    }

    /// Bad caller input rather than a broken dependency
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidRatio(_)
                | Self::InvalidProduct(_)
                | Self::InvalidQuantity(_)
                | Self::InvalidPh(_)
                | Self::UnknownSoilType(_)
                | Self::UnknownNutrient(_)
                | Self::EmptyQuery
                | Self::UnsupportedFile(_)
                | Self::EmptyDocument(_)
        )
    }
}

impl From<AgentError> for AdvisorError {
    fn from(err: AgentError) -> Self {
        if err.is_retryable() {
            Self::EmbeddingUnavailable(err.to_string())
        } else {
            Self::Embedding(err.to_string())
        }
    }
}

impl From<AdvisorError> for AgentError {
    fn from(err: AdvisorError) -> Self {
        if err.is_invalid_input() {
            return Self::ToolValidation(err.to_string());
        }
        match err {
            AdvisorError::EmbeddingUnavailable(_) | AdvisorError::Embedding(_) | AdvisorError::Timeout(_) => {
                Self::Retrieval(err.to_string())
            }
            AdvisorError::Config(msg) => Self::Config(msg),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}
