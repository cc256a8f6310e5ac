//! Wire types for the chat completions API.
//!
//! These mirror the OpenAI-compatible Chat Completions schema that Groq
//! serves, used for both request building and response parsing. Payloads are
//! validated at the decode boundary; nothing downstream navigates untyped JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ChatError;

// ─── Messages ────────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation.
///
/// `content` is always serialized (as `null` when absent) because assistant
/// messages that carry `tool_calls` are echoed back exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    /// Set on `tool` messages: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `tool` messages: the function that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Assistant messages may request tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(content.into()))
    }

    /// An assistant message that requests tool calls and carries no text.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, None)
        }
    }

    /// The result of one tool call, correlated by `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(Role::Tool, Some(content.into()))
        }
    }

    /// Whether the message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    /// Message text, or `""` when `content` is null.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Check the per-role invariants.
    ///
    /// `tool` messages must name both the call they answer and the function.
    /// Only assistant messages may carry `tool_calls`.
    pub fn validate(&self) -> Result<(), ChatError> {
        match self.role {
            Role::Tool if self.tool_call_id.is_none() || self.name.is_none() => {
                Err(ChatError::InvalidRequest {
                    reason: "tool message must carry tool_call_id and name".into(),
                })
            }
            Role::System | Role::User | Role::Tool if self.tool_calls.is_some() => {
                Err(ChatError::InvalidRequest {
                    reason: format!("{:?} message cannot carry tool_calls", self.role),
                })
            }
            _ => Ok(()),
        }
    }

    /// Assign `call_<uuid>` ids to tool calls the model left without one.
    pub(crate) fn ensure_tool_call_ids(&mut self) {
        if let Some(calls) = self.tool_calls.as_mut() {
            for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
                call.id = format!("call_{}", Uuid::new_v4());
            }
        }
    }
}

// ─── Tools ───────────────────────────────────────────────────────────────────

fn function_type() -> String {
    "function".to_string()
}

/// A tool call requested by the model inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: FunctionCall,
}

/// The function half of a tool call. `arguments` is raw JSON text as the
/// model produced it; it is handed to the handler unparsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            r#type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

/// Tool definition sent in the request. The executable handler lives in the
/// agent's tool registry and never goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema document describing the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            r#type: function_type(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// `tool_choice` request field: a mode string or one named function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedToolChoice {
    pub r#type: String,
    pub function: NamedFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}

impl ToolChoice {
    pub fn auto() -> Self {
        ToolChoice::Mode(ToolChoiceMode::Auto)
    }

    /// Force the model to call `name`.
    pub fn named(name: impl Into<String>) -> Self {
        ToolChoice::Named(NamedToolChoice {
            r#type: function_type(),
            function: NamedFunction { name: name.into() },
        })
    }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Structured output format hint (`{"type": "json_object"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    pub r#type: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            r#type: "json_object".to_string(),
        }
    }
}

/// `stop` accepts one sequence or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

/// Optional sampling parameters, flattened into the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            tool_choice: None,
            stream: false,
            sampling: SamplingParams::default(),
            response_format: None,
        }
    }

    /// Attach tool definitions. An empty list leaves `tools` unset.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

// ─── Buffered Response ───────────────────────────────────────────────────────

/// A full, non-streaming completion. The first choice's message is the
/// canonical output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl CompletionResult {
    pub fn first_message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }

    pub fn into_first_message(self) -> Option<Message> {
        self.choices.into_iter().next().map(|c| c.message)
    }
}

// ─── Streaming Response ──────────────────────────────────────────────────────

/// Typed view of one streamed chunk. Every field is optional so that any
/// JSON object decodes; fields of the wrong type are a decode error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment within a streaming delta.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkToolCall {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One decoded `data:` payload of a streamed response.
///
/// Keeps the raw document alongside its typed view so callers can reach
/// provider-specific fields (`x_groq`, usage stats) without a second parse.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEvent {
    raw: serde_json::Value,
    chunk: ChatCompletionChunk,
}

impl DeltaEvent {
    /// Parse one payload. The payload must be a JSON object whose known
    /// fields have the expected types.
    pub fn from_json(payload: &str) -> Result<Self, ChatError> {
        let raw: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
            ChatError::decode(format!("failed to parse SSE chunk: {e} (data: {payload})"))
        })?;
        if !raw.is_object() {
            return Err(ChatError::decode(format!(
                "SSE chunk is not a JSON object (data: {payload})"
            )));
        }
        let chunk = ChatCompletionChunk::deserialize(&raw).map_err(|e| {
            ChatError::decode(format!("SSE chunk has unexpected shape: {e} (data: {payload})"))
        })?;
        Ok(Self { raw, chunk })
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn chunk(&self) -> &ChatCompletionChunk {
        &self.chunk
    }

    /// Text fragment of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.chunk
            .choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
