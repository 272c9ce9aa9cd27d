//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM or embedding provider rejected the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Model asked for a tool outside the tool table
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments missing or out of range
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool ran but could not produce a result
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Knowledge base unreachable or timed out
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Step ceiling reached in the agent loop
    #[error("Step limit ({0}) reached")]
    StepLimitExceeded(usize),

    /// Parse error (e.g., malformed tool block)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Chat session store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Session exists and belongs to a different user
    #[error("Session {0} belongs to another user")]
    SessionOwnership(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::Retrieval(_))
    }

    /// Whether the loop should hand this error back to the model as a tool result
    pub const fn is_recoverable_tool_error(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::ToolValidation(_)
                | Self::ToolExecution(_)
                | Self::Retrieval(_)
                | Self::Parse(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid tool input: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::Retrieval(_) => "Could not access the knowledge base.".into(),
            Self::StepLimitExceeded(_) => {
                "The answer was cut short after too many tool calls; it may be incomplete.".into()
            }
            Self::Persistence(_) => "Chat history could not be saved.".into(),
            Self::SessionOwnership(_) => "This chat session belongs to another user.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
