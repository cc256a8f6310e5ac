//! Chat completions client.
//!
//! Builds the outbound call for a [`ChatRequest`], validates the HTTP status,
//! and either parses the buffered JSON body or hands the live body to a
//! [`DeltaStream`]. Transport, authentication, and retries belong to the
//! [`Transport`] implementation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::{ClientConfig, ResponseFormatPolicy};
use super::errors::ChatError;
use super::streaming::{DeltaStream, MessageAccumulator};
use super::transport::{
    until_cancelled, HttpRequest, ReqwestTransport, Transport, TransportResponse,
};
use super::types::{ChatRequest, CompletionResult, Message, ResponseFormat};

// ─── Constants ───────────────────────────────────────────────────────────────

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

const MODELS_PATH: &str = "models";

// ─── CompletionClient ────────────────────────────────────────────────────────

/// Client for the chat completions endpoint.
///
/// Cheap to share behind an `Arc`; the transport underneath may be reused by
/// many conversations at once.
pub struct CompletionClient {
    transport: Arc<dyn Transport>,
    default_model: String,
    response_format: ResponseFormatPolicy,
}

impl CompletionClient {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            default_model: config.default_model.clone(),
            response_format: config.response_format,
        }
    }

    /// Validate `config` and build a client over a [`ReqwestTransport`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// A request for the default model.
    pub fn request(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest::new(self.default_model.clone(), messages)
    }

    // ─── Chat Completion (non-streaming) ─────────────────────────────────

    /// Send a buffered completion request.
    ///
    /// `request.stream` must be `false`. Fails with [`ChatError::Api`] on a
    /// non-2xx status (carrying the raw body) and [`ChatError::Decode`] when
    /// the body is not a completion object with at least one choice.
    pub async fn complete_once(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, ChatError> {
        if request.stream {
            return Err(ChatError::InvalidRequest {
                reason: "complete_once requires stream=false; use complete_streaming".into(),
            });
        }
        let body = self.prepare(request, false);
        log_request(&body);

        let http = HttpRequest::post_json(CHAT_COMPLETIONS_PATH, &body)?;
        let response = until_cancelled(cancel, self.transport.send(http)).await?;
        let response = check_status(response, cancel).await?;
        let text = until_cancelled(cancel, response.text()).await?;

        let mut result: CompletionResult = serde_json::from_str(&text).map_err(|e| {
            ChatError::decode(format!("failed to parse completion response: {e}"))
        })?;
        if result.choices.is_empty() {
            return Err(ChatError::decode("empty choices array"));
        }
        for choice in &mut result.choices {
            choice.message.ensure_tool_call_ids();
        }

        tracing::info!(
            model = result.model.as_deref().unwrap_or(&body.model),
            finish_reason = result.choices[0].finish_reason.as_deref().unwrap_or("none"),
            tool_calls = result.choices[0]
                .message
                .tool_calls
                .as_ref()
                .map(Vec::len)
                .unwrap_or(0),
            total_tokens = result.usage.map(|u| u.total_tokens).unwrap_or(0),
            "completion received"
        );
        Ok(result)
    }

    // ─── Chat Completion (streaming) ─────────────────────────────────────

    /// Open a streaming completion.
    ///
    /// Works on a copy with `stream=true`; the caller's request is untouched.
    /// The status is checked before any body byte is decoded.
    pub async fn complete_streaming(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        let body = self.prepare(request, true);
        log_request(&body);

        let http = HttpRequest::post_json(CHAT_COMPLETIONS_PATH, &body)?.streaming();
        let response = until_cancelled(cancel, self.transport.send(http)).await?;
        let response = check_status(response, cancel).await?;

        Ok(DeltaStream::new(response.body, cancel.clone()))
    }

    /// Stream a completion and fold it into the final assistant message.
    pub async fn complete_streaming_collected(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, ChatError> {
        let mut stream = self.complete_streaming(request, cancel).await?;
        let mut accumulator = MessageAccumulator::new();
        while let Some(event) = stream.next_event().await {
            accumulator.push(&event?);
        }
        tracing::debug!(
            events = stream.events_yielded(),
            end = ?stream.end_reason(),
            finish_reason = accumulator.finish_reason().unwrap_or("none"),
            "stream collected"
        );
        Ok(accumulator.into_message())
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Whether the endpoint answers `GET /models` with a 2xx status.
    ///
    /// Connection failures report `false`; only cancellation is an error.
    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<bool, ChatError> {
        match until_cancelled(cancel, self.transport.send(HttpRequest::get(MODELS_PATH))).await {
            Ok(resp) => Ok(resp.is_success()),
            Err(ChatError::Cancelled) => Err(ChatError::Cancelled),
            Err(e) => {
                tracing::debug!(error = %e, "health check failed");
                Ok(false)
            }
        }
    }

    /// Copy `request`, set `stream`, and apply the response format policy.
    fn prepare(&self, request: &ChatRequest, stream: bool) -> ChatRequest {
        let mut body = request.clone();
        body.stream = stream;
        if body.response_format.is_none() && self.response_format.applies(body.has_tools()) {
            body.response_format = Some(ResponseFormat::json_object());
        }
        body
    }
}

/// Log request metadata (never the full body, which can be huge).
fn log_request(body: &ChatRequest) {
    tracing::info!(
        model = %body.model,
        message_count = body.messages.len(),
        tool_count = body.tools.as_ref().map(Vec::len).unwrap_or(0),
        stream = body.stream,
        json_mode = body.response_format.is_some(),
        "chat completion request"
    );
}

/// Turn a non-2xx response into [`ChatError::Api`] with the raw body.
async fn check_status(
    response: TransportResponse,
    cancel: &CancellationToken,
) -> Result<TransportResponse, ChatError> {
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status;
    let body = match until_cancelled(cancel, response.text()).await {
        Ok(text) => text,
        Err(ChatError::Cancelled) => return Err(ChatError::Cancelled),
        Err(e) => format!("<unreadable error body: {e}>"),
    };
    tracing::warn!(status, body = %body, "chat completion request failed");
    Err(ChatError::Api { status, body })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
