//! Conversation orchestrator: the tool-calling loop.
//!
//! Drives one conversation through
//! `BuildingRequest → AwaitingModel → {ToolsRequested → ExecutingTools → BuildingRequest} | Done`.
//!
//! Rounds are strictly sequential: round N+1 is never requested before round
//! N's tool results are in the history. The number of tool rounds is capped by
//! `OrchestratorConfig::max_tool_rounds`; a model that keeps asking for tools
//! past the cap ends the conversation with `RoundLimitExceeded`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::inference::client::CompletionClient;
use crate::inference::config::OrchestratorConfig;
use crate::inference::errors::ChatError;
use crate::inference::types::{ChatRequest, Message, SamplingParams, ToolChoice, ToolDefinition};

use super::conversation::ConversationHistory;
use super::errors::AgentError;
use super::tool_router::{ToolDispatcher, ToolRegistry};

// ─── Types ──────────────────────────────────────────────────────────────────

/// Observable state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    BuildingRequest,
    AwaitingModel,
    ToolsRequested,
    ExecutingTools,
    Done,
}

/// Loop state plus the data that state carries.
enum Step {
    BuildingRequest,
    AwaitingModel(ChatRequest),
    ToolsRequested(Message),
    ExecutingTools(Message),
    Done(Message),
}

impl Step {
    fn state(&self) -> ConversationState {
        match self {
            Step::BuildingRequest => ConversationState::BuildingRequest,
            Step::AwaitingModel(_) => ConversationState::AwaitingModel,
            Step::ToolsRequested(_) => ConversationState::ToolsRequested,
            Step::ExecutingTools(_) => ConversationState::ExecutingTools,
            Step::Done(_) => ConversationState::Done,
        }
    }
}

/// Final answer plus the full transcript of a finished conversation.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// Content of the last assistant message (`""` if it was null).
    pub answer: String,
    /// Every message exchanged, seed messages and final answer included.
    pub messages: Vec<Message>,
    /// Number of tool-dispatch rounds that ran.
    pub rounds: u32,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    client: Arc<CompletionClient>,
    config: OrchestratorConfig,
    model: String,
    sampling: SamplingParams,
    /// Sent whenever tools are offered. `None` means `auto`.
    tool_choice: Option<ToolChoice>,
}

impl Orchestrator {
    pub fn new(client: Arc<CompletionClient>, config: OrchestratorConfig) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            config,
            model,
            sampling: SamplingParams::default(),
            tool_choice: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a conversation to completion and return only the final answer.
    pub async fn run_conversation(
        &self,
        system: &str,
        user: &str,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.run(system, user, registry, cancel)
            .await
            .map(|outcome| outcome.answer)
    }

    /// Run a conversation seeded with one system and one user message.
    ///
    /// Client errors end the conversation immediately. Tool lookup and
    /// handler failures are fed back to the model as tool results.
    pub async fn run(
        &self,
        system: &str,
        user: &str,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<ConversationOutcome, AgentError> {
        self.config.validate()?;

        let mut history = ConversationHistory::seeded(system, user);
        let tools = registry.definitions();
        let dispatcher = ToolDispatcher::new(registry).concurrent(self.config.concurrent_tools);
        let mut rounds: u32 = 0;
        let mut step = Step::BuildingRequest;

        tracing::info!(
            model = %self.model,
            tool_count = tools.len(),
            max_rounds = self.config.max_tool_rounds,
            "conversation started"
        );

        loop {
            if cancel.is_cancelled() {
                tracing::info!(round = rounds, state = ?step.state(), "conversation cancelled");
                return Err(AgentError::Cancelled);
            }
            tracing::debug!(round = rounds, state = ?step.state(), "conversation step");

            step = match step {
                Step::BuildingRequest => Step::AwaitingModel(self.build_request(&history, &tools)),

                Step::AwaitingModel(request) => {
                    let message = self.call_model(&request, cancel).await?;
                    if message.has_tool_calls() {
                        Step::ToolsRequested(message)
                    } else {
                        Step::Done(message)
                    }
                }

                Step::ToolsRequested(message) => {
                    if rounds >= self.config.max_tool_rounds {
                        tracing::warn!(
                            max_rounds = self.config.max_tool_rounds,
                            "model still requesting tools at round limit"
                        );
                        return Err(AgentError::RoundLimitExceeded {
                            max_rounds: self.config.max_tool_rounds,
                        });
                    }
                    // Appended exactly as received, tool_calls included.
                    history.push(message.clone())?;
                    Step::ExecutingTools(message)
                }

                Step::ExecutingTools(message) => {
                    let results = dispatcher.dispatch(&message, cancel).await?;
                    history.extend(results)?;
                    rounds += 1;
                    tracing::info!(
                        round = rounds,
                        message_count = history.len(),
                        "tool round complete"
                    );
                    Step::BuildingRequest
                }

                Step::Done(message) => {
                    let answer = message.text().to_string();
                    history.push(message)?;
                    tracing::info!(
                        rounds,
                        message_count = history.len(),
                        answer_len = answer.len(),
                        "conversation finished"
                    );
                    return Ok(ConversationOutcome {
                        answer,
                        messages: history.into_messages(),
                        rounds,
                    });
                }
            };
        }
    }

    /// Fresh request from the current history.
    fn build_request(
        &self,
        history: &ConversationHistory,
        tools: &[ToolDefinition],
    ) -> ChatRequest {
        let mut request = ChatRequest::new(self.model.clone(), history.messages().to_vec())
            .with_tools(tools.to_vec())
            .with_sampling(self.sampling.clone());
        if request.has_tools() {
            request.tool_choice = Some(self.tool_choice.clone().unwrap_or_else(ToolChoice::auto));
        }
        request
    }

    /// One model turn, buffered or streamed per config.
    async fn call_model(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, ChatError> {
        if self.config.stream_responses {
            return self.client.complete_streaming_collected(request, cancel).await;
        }
        self.client
            .complete_once(request, cancel)
            .await?
            .into_first_message()
            .ok_or_else(|| ChatError::decode("empty choices array"))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
