//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// Request timed out.
    #[error("request timed out after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The provider SDK rejected or failed the call.
    #[error("{provider} request failed: {reason}")]
    ServiceError {
        provider: &'static str,
        reason: String,
    },

    /// SSE / event-stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// The conversation could not be converted into a provider request.
    #[error("failed to build request: {reason}")]
    RequestBuild {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    pub fn config(reason: impl Into<String>) -> Self {
        InferenceError::ConfigError {
            reason: reason.into(),
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
        assert_eq!(err.to_string(), "HTTP 500: test body");
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::config("bad budget");
        assert!(err.error_body().is_none());
        assert_eq!(err.to_string(), "config error: bad budget");
    }

    #[test]
    fn test_service_error_names_provider() {
        let err = InferenceError::ServiceError {
            provider: "bedrock",
            reason: "throttled".into(),
        };
        assert_eq!(err.to_string(), "bedrock request failed: throttled");
    }
}
