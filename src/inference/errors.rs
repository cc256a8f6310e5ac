//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Which stage of a call produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Transport,
    Api,
    Decode,
    Request,
    Config,
    Cancelled,
}

/// Errors that can occur while talking to the chat completions endpoint.
#[derive(Debug, Error)]
pub enum ChatError {
    /// TCP/HTTP connection to the endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// The endpoint did not respond within the configured timeout.
    #[error("request timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response. `body` is the raw error body.
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Malformed JSON (or a JSON document of the wrong shape) where a valid
    /// payload was required.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// The request was not valid for the operation it was passed to.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl ChatError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        ChatError::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ChatError::Config {
            reason: reason.into(),
        }
    }

    /// The stage this error belongs to.
    pub fn stage(&self) -> FailureStage {
        match self {
            ChatError::Transport { .. } | ChatError::Timeout { .. } => FailureStage::Transport,
            ChatError::Api { .. } => FailureStage::Api,
            ChatError::Decode { .. } => FailureStage::Decode,
            ChatError::InvalidRequest { .. } => FailureStage::Request,
            ChatError::Config { .. } => FailureStage::Config,
            ChatError::Cancelled => FailureStage::Cancelled,
        }
    }

    /// Whether this is a connection-level failure from the transport.
    pub fn is_transport(&self) -> bool {
        self.stage() == FailureStage::Transport
    }

    /// Extract the error body text, if this is an `Api` error.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            ChatError::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}
