//! Agent error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that end an agent turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model request or its stream failed.
    #[error("model request failed: {source}")]
    Inference {
        #[from]
        source: InferenceError,
    },

    /// The model kept calling tools past the round limit.
    #[error("no final answer after {limit} model rounds")]
    RoundLimit { limit: usize },

    /// Nobody is listening for the turn's events any more.
    #[error("event consumer disconnected")]
    ChannelClosed,

    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_inference_error_is_source() {
        let err: AgentError = InferenceError::HttpError {
            status: 429,
            body: "slow down".into(),
        }
        .into();
        assert_eq!(err.to_string(), "model request failed: HTTP 429: slow down");
        assert!(err.source().is_some());
    }
}
