//! Agent Core error types.

use thiserror::Error;

use crate::inference::errors::{ChatError, FailureStage};

/// Which stage of a conversation produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    /// A completion call failed at the given stage.
    Client(FailureStage),
    /// The conversation hit its tool-round cap.
    BoundExceeded,
    Request,
    Cancelled,
}

/// Errors that end a conversation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The completion call failed (transport, HTTP status, or decoding).
    #[error("completion failed: {0}")]
    Client(ChatError),

    /// The model kept requesting tools past the configured round cap.
    #[error("tool round limit exceeded: model still requested tools after {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: u32 },

    /// Two tools were registered under the same name.
    #[error("tool '{name}' is already registered")]
    DuplicateTool { name: String },

    /// A message violated the per-role invariants.
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// The caller's cancellation token fired.
    #[error("conversation cancelled")]
    Cancelled,
}

impl AgentError {
    /// The stage that failed.
    pub fn stage(&self) -> AgentStage {
        match self {
            AgentError::Client(e) => AgentStage::Client(e.stage()),
            AgentError::RoundLimitExceeded { .. } => AgentStage::BoundExceeded,
            AgentError::DuplicateTool { .. } | AgentError::InvalidMessage { .. } => {
                AgentStage::Request
            }
            AgentError::Cancelled => AgentStage::Cancelled,
        }
    }
}

impl From<ChatError> for AgentError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Cancelled => AgentError::Cancelled,
            other => AgentError::Client(other),
        }
    }
}

/// Per-call tool failures. Never propagated: the dispatcher turns them into
/// tool-result messages so the model can react.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model asked for a tool that is not in the registry.
    #[error("tool not found: '{name}'")]
    NotFound { name: String },

    /// The handler returned an error.
    #[error("tool '{name}' failed: {reason}")]
    Execution { name: String, reason: String },
}

impl ToolError {
    /// JSON error payload sent back to the model as tool-result content.
    pub fn to_payload(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_chat_error_maps_to_agent_cancelled() {
        assert!(matches!(AgentError::from(ChatError::Cancelled), AgentError::Cancelled));
        let err = AgentError::from(ChatError::Api {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(err.stage(), AgentStage::Client(FailureStage::Api));
        assert!(err.to_string().contains("HTTP 500: boom"));
    }

    #[test]
    fn test_round_limit_is_labelled() {
        let err = AgentError::RoundLimitExceeded { max_rounds: 3 };
        assert_eq!(err.stage(), AgentStage::BoundExceeded);
        assert_eq!(AgentError::Cancelled.stage(), AgentStage::Cancelled);
        let dup = AgentError::DuplicateTool { name: "add".into() };
        assert_eq!(dup.stage(), AgentStage::Request);
    }

    #[test]
    fn test_tool_error_payload_is_json() {
        let payload = ToolError::NotFound {
            name: "nope".into(),
        }
        .to_payload();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["error"], "tool not found: 'nope'");
    }
}
