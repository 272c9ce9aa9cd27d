//! Access Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, AccessError>;

/// Authentication and rate-limit errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No bearer token on the request
    #[error("Missing bearer token")]
    MissingToken,

    /// Token is malformed or its signature does not verify
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token `exp` is in the past
    #[error("Token expired")]
    Expired,

    /// Too many requests in the current window
    #[error("Rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AccessError {
    /// Whether the caller failed to authenticate
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::MissingToken | Self::InvalidToken(_) | Self::Expired)
    }

    /// Seconds for a `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::MissingToken => "Authentication required.",
            Self::InvalidToken(_) => "Invalid authentication token.",
            Self::Expired => "Your session has expired. Please sign in again.",
            Self::RateLimited { .. } => "Too many requests. Please slow down.",
            Self::Config(_) => "Service configuration error.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let err = AccessError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(err.retry_after_secs(), Some(2));

        let tiny = AccessError::RateLimited {
            retry_after: Duration::from_millis(1),
        };
        assert_eq!(tiny.retry_after_secs(), Some(1));
        assert_eq!(AccessError::Expired.retry_after_secs(), None);
    }
}
