//! Agent Core: the tool-calling conversation layer.
//!
//! Submodules:
//! - `conversation`: Message history owned by one conversation
//! - `tool_router`: Tool registry and the per-round dispatcher
//! - `orchestrator`: The bounded send → dispatch → resend loop
//! - `errors`: Agent-level and per-tool error types

pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod tool_router;

// Re-exports for convenience
pub use conversation::ConversationHistory;
pub use errors::{AgentError, AgentStage, ToolError};
pub use orchestrator::{ConversationOutcome, ConversationState, Orchestrator};
pub use tool_router::{FnHandler, ToolDispatcher, ToolHandler, ToolOutcome, ToolRegistry};
