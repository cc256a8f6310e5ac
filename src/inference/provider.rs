//! Single-prompt provider facade.
//!
//! For callers that only want "prompt in, text out" without building a
//! conversation: no tools, no history.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::client::CompletionClient;
use super::errors::ChatError;
use super::types::{Message, SamplingParams};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a reply to a single user prompt.
    async fn generate(&self, prompt: &str, cancel: &CancellationToken)
        -> Result<String, ChatError>;
}

/// [`LlmProvider`] over a Groq-compatible [`CompletionClient`].
pub struct GroqProvider {
    client: Arc<CompletionClient>,
    model: String,
    sampling: SamplingParams,
}

impl GroqProvider {
    pub fn new(client: Arc<CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            model,
            sampling: SamplingParams::default(),
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

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        let mut request = self
            .client
            .request(vec![Message::user(prompt)])
            .with_sampling(self.sampling.clone());
        request.model = self.model.clone();

        let result = self.client.complete_once(&request, cancel).await?;
        Ok(result
            .into_first_message()
            .and_then(|m| m.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::ClientConfig;
    use crate::inference::transport::testing::ScriptedTransport;

    fn provider(transport: &Arc<ScriptedTransport>) -> GroqProvider {
        let config = ClientConfig::new("k").with_default_model("default-model");
        GroqProvider::new(Arc::new(CompletionClient::new(transport.clone(), &config)))
    }

    #[tokio::test]
    async fn test_generate_returns_content() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"4"}}]}"#,
        );
        let provider = provider(&transport).with_sampling(SamplingParams {
            temperature: Some(0.0),
            ..Default::default()
        });

        let reply = provider
            .generate("what is 2+2?", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "4");

        let sent = transport.request_json(0);
        assert_eq!(sent["model"], "default-model");
        assert_eq!(sent["messages"][0]["role"], "user");
        assert_eq!(sent["messages"][0]["content"], "what is 2+2?");
        assert_eq!(sent["temperature"], 0.0);
        assert!(sent.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_generate_null_content_is_empty() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#,
        );
        let provider = provider(&transport).with_model("other");
        assert_eq!(provider.model(), "other");

        let reply = provider.generate("hi", &CancellationToken::new()).await.unwrap();
        assert_eq!(reply, "");
        assert_eq!(transport.request_json(0)["model"], "other");
    }

    #[tokio::test]
    async fn test_generate_propagates_api_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(429, "rate limited");
        let err = provider(&transport)
            .generate("hi", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_body(), Some("rate limited"));
    }
}
