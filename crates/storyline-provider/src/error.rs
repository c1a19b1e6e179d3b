//! Error types for the provider client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the scheduling provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request did not complete within its time budget.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Non-success response from the provider.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The request was rejected locally before being sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Whether retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => !e.is_builder() && !e.is_decode(),
            ProviderError::Timeout(_) | ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Json(_) | ProviderError::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        let err = ProviderError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let err = ProviderError::Api {
            status: 422,
            message: "bad media".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!ProviderError::InvalidRequest("x".to_string()).is_transient());
    }

    #[test]
    fn test_timeout_display_keeps_subsecond_budget() {
        let err = ProviderError::Timeout(Duration::from_millis(250));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }

    #[test]
    fn test_rate_limit_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "rate limited (retry after 30s)");

        let err = ProviderError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }
}
