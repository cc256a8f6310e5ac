//! Inference client: OpenAI-compatible chat completions over Groq.
//!
//! This module handles all communication with the completion endpoint:
//! - Buffered and streaming chat completions
//! - SSE line decoding into typed delta events
//! - Folding streamed deltas back into an assistant message
//! - Client configuration from YAML and environment
//!
//! The HTTP layer sits behind the [`transport::Transport`] trait, so the
//! client and stream decoder run unchanged against a scripted transport.

pub mod client;
pub mod config;
pub mod errors;
pub mod provider;
pub mod streaming;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::CompletionClient;
pub use config::{
    find_config_path, load_config, AppConfig, ClientConfig, OrchestratorConfig,
    ResponseFormatPolicy,
};
pub use errors::{ChatError, FailureStage};
pub use provider::{GroqProvider, LlmProvider};
pub use streaming::{DeltaStream, MessageAccumulator, StreamEnd};
pub use transport::{HttpRequest, ReqwestTransport, Transport, TransportResponse};
pub use types::{
    ChatRequest, CompletionResult, DeltaEvent, Message, Role, SamplingParams, ToolCall,
    ToolChoice, ToolDefinition,
};
