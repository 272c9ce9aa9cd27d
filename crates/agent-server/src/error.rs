//! API Errors
//!
//! Every handler and middleware failure ends up as an [`ApiError`], which
//! renders as `{"error": ..., "code": ...}` with a matching status.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use agent_access::AccessError;
use agent_core::AgentError;
use plant_advisor::AdvisorError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Request body or query failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The turn did not finish within the request timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Advisor(#[from] AdvisorError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Access(e) if e.is_auth_failure() => StatusCode::UNAUTHORIZED,
            Self::Access(AccessError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Agent(AgentError::SessionOwnership(_)) => StatusCode::FORBIDDEN,
            Self::Agent(AgentError::ProviderUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Advisor(e) if e.is_invalid_input() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Advisor(AdvisorError::UnsupportedFile(_) | AdvisorError::EmptyDocument(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Advisor(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Access(_) | Self::Agent(_) | Self::Advisor(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Access(AccessError::RateLimited { .. }) => "RATE_LIMITED",
            Self::Access(AccessError::Config(_)) => "CONFIG_ERROR",
            Self::Access(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Agent(AgentError::SessionOwnership(_)) => "FORBIDDEN",
            Self::Agent(AgentError::ProviderUnavailable(_)) => "PROVIDER_UNAVAILABLE",
            Self::Agent(_) => "AGENT_ERROR",
            Self::Advisor(_) => "DOCUMENT_ERROR",
        }
    }

    /// Text safe to show the client
    pub fn user_message(&self) -> String {
        match self {
            Self::Access(e) => e.user_message().into(),
            Self::Validation(msg) => msg.clone(),
            Self::Timeout(_) => "The assistant took too long to answer. Please try again.".into(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Agent(e) => e.user_message(),
            Self::Advisor(e) if e.is_transient() => "The embedding service is unavailable. Please try again.".into(),
            Self::Advisor(e) if self.status() == StatusCode::UNPROCESSABLE_ENTITY => e.to_string(),
            Self::Advisor(_) => "The document could not be processed.".into(),
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.user_message(),
            code: self.code().into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }

        let mut response = (status, Json(self.body())).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl ApiError {
    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Access(e) => e.retry_after_secs(),
            _ => None,
        }
    }
}
