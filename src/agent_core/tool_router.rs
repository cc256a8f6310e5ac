//! Tool registry and dispatcher.
//!
//! The dispatcher is the bridge between the model's tool call decisions and
//! the caller-supplied handlers. It handles:
//! - Lookup by function name (unknown names become error results)
//! - Execution, sequential or concurrent within one round
//! - Converting handler failures into tool-result messages
//! - Emitting results in the order the model issued the calls

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::inference::types::{Message, ToolCall, ToolDefinition};

use super::errors::{AgentError, ToolError};

// ─── Handlers ───────────────────────────────────────────────────────────────

/// Executes one tool. Receives the raw JSON-encoded argument string exactly
/// as the model produced it.
///
/// The dispatcher imposes no timeout; handlers doing I/O should apply their own.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &str) -> anyhow::Result<String>;
}

/// [`ToolHandler`] backed by an async closure.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        (self.0)(arguments.to_string()).await
    }
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

/// A tool's wire definition paired with its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

/// Caller-owned mapping from tool name to handler. Names are unique.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), AgentError> {
        let name = definition.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(AgentError::DuplicateTool { name });
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(RegisteredTool {
            definition,
            handler,
        });
        Ok(())
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        f: F,
    ) -> Result<(), AgentError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.register(
            ToolDefinition::function(name, description, parameters),
            Arc::new(FnHandler::new(f)),
        )
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Wire definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.definition.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── ToolOutcome ────────────────────────────────────────────────────────────

/// Result of one tool call. Failures are values.
#[derive(Debug)]
pub enum ToolOutcome {
    Success(String),
    Failed(ToolError),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// Tool-result message content: handler output, or a JSON error payload.
    pub fn into_content(self) -> String {
        match self {
            ToolOutcome::Success(text) => text,
            ToolOutcome::Failed(err) => err.to_payload(),
        }
    }
}

// ─── ToolDispatcher ─────────────────────────────────────────────────────────

/// Runs one round of tool calls against a borrowed registry.
pub struct ToolDispatcher<'a> {
    registry: &'a ToolRegistry,
    concurrent: bool,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry,
            concurrent: false,
        }
    }

    /// Await all calls of a round together instead of one after another.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Execute every tool call in `message` and return the tool-result
    /// messages in call order. Returns an empty list when no tools were
    /// requested.
    ///
    /// Only cancellation is an error; unknown tools and handler failures are
    /// encoded into the returned messages.
    pub async fn dispatch(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, AgentError> {
        let calls = match message.tool_calls.as_deref() {
            Some(calls) if !calls.is_empty() => calls,
            _ => return Ok(Vec::new()),
        };

        tracing::info!(
            count = calls.len(),
            concurrent = self.concurrent,
            "dispatching tool calls"
        );

        let run = async {
            if self.concurrent {
                join_all(calls.iter().map(|call| self.execute(call))).await
            } else {
                let mut outcomes = Vec::with_capacity(calls.len());
                for call in calls {
                    outcomes.push(self.execute(call).await);
                }
                outcomes
            }
        };

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            outcomes = run => outcomes,
        };

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed > 0 {
            tracing::warn!(failed, total = calls.len(), "some tool calls failed");
        }

        // join_all yields in input order, so zipping restores call order.
        Ok(calls
            .iter()
            .zip(outcomes)
            .map(|(call, outcome)| {
                Message::tool_result(&call.id, call.function_name(), outcome.into_content())
            })
            .collect())
    }

    /// Execute a single tool call.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let name = call.function_name();
        let Some(tool) = self.registry.get(name) else {
            tracing::warn!(tool = %name, call_id = %call.id, "model requested unknown tool");
            return ToolOutcome::Failed(ToolError::NotFound {
                name: name.to_string(),
            });
        };

        let start = Instant::now();
        match tool.handler.call(call.arguments()).await {
            Ok(output) => {
                tracing::info!(
                    tool = %name,
                    call_id = %call.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    result_len = output.len(),
                    "tool call succeeded"
                );
                ToolOutcome::Success(output)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    call_id = %call.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "tool call failed"
                );
                ToolOutcome::Failed(ToolError::Execution {
                    name: name.to_string(),
                    reason: format!("{e:#}"),
                })
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::inference::types::Role;

    fn add_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                "add",
                "Add two integers",
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"]
                }),
                |args| async move {
                    let v: serde_json::Value = serde_json::from_str(&args)?;
                    let a = v["a"].as_i64().ok_or_else(|| anyhow::anyhow!("missing a"))?;
                    let b = v["b"].as_i64().ok_or_else(|| anyhow::anyhow!("missing b"))?;
                    Ok::<_, anyhow::Error>((a + b).to_string())
                },
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_add_tool() {
        let registry = add_registry();
        let message = Message::assistant_tool_calls(vec![ToolCall::function(
            "c1",
            "add",
            r#"{"a":1,"b":2}"#,
        )]);

        let results = ToolDispatcher::new(&registry)
            .dispatch(&message, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results, vec![Message::tool_result("c1", "add", "3")]);
        assert_eq!(results[0].role, Role::Tool);
    }

    #[tokio::test]
    async fn test_dispatch_without_tool_calls_is_empty() {
        let registry = add_registry();
        let dispatcher = ToolDispatcher::new(&registry);
        let cancel = CancellationToken::new();

        assert!(dispatcher
            .dispatch(&Message::assistant("done"), &cancel)
            .await
            .unwrap()
            .is_empty());
        assert!(dispatcher
            .dispatch(&Message::assistant_tool_calls(Vec::new()), &cancel)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_handler_failure_become_payloads() {
        let registry = add_registry();
        let message = Message::assistant_tool_calls(vec![
            ToolCall::function("c1", "multiply", "{}"),
            ToolCall::function("c2", "add", "not json"),
            ToolCall::function("c3", "add", r#"{"a":2,"b":2}"#),
        ]);

        let results = ToolDispatcher::new(&registry)
            .dispatch(&message, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        let missing: serde_json::Value = serde_json::from_str(results[0].text()).unwrap();
        assert_eq!(missing["error"], "tool not found: 'multiply'");
        assert_eq!(results[0].name.as_deref(), Some("multiply"));

        let failed: serde_json::Value = serde_json::from_str(results[1].text()).unwrap();
        assert!(failed["error"].as_str().unwrap().starts_with("tool 'add' failed:"));

        assert_eq!(results[2].text(), "4");

        let dispatcher = ToolDispatcher::new(&registry);
        assert!(!dispatcher
            .execute(&ToolCall::function("c4", "multiply", "{}"))
            .await
            .is_success());
        assert!(dispatcher
            .execute(&ToolCall::function("c5", "add", r#"{"a":0,"b":0}"#))
            .await
            .is_success());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_preserves_call_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        let log = finished.clone();
        registry
            .register_fn("sleep", "Sleep for n ms", json!({"type": "object"}), move |args| {
                let log = log.clone();
                async move {
                    let v: serde_json::Value = serde_json::from_str(&args)?;
                    let ms = v["ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    log.lock().unwrap().push(ms);
                    Ok::<_, anyhow::Error>(format!("slept {ms}"))
                }
            })
            .unwrap();

        let message = Message::assistant_tool_calls(vec![
            ToolCall::function("slow", "sleep", r#"{"ms":80}"#),
            ToolCall::function("mid", "sleep", r#"{"ms":30}"#),
            ToolCall::function("fast", "sleep", r#"{"ms":0}"#),
        ]);

        let results = ToolDispatcher::new(&registry)
            .concurrent(true)
            .dispatch(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*finished.lock().unwrap(), vec![0, 30, 80]);
        let ids: Vec<_> = results
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["slow", "mid", "fast"]);
        assert_eq!(results[0].text(), "slept 80");
    }

    #[tokio::test]
    async fn test_dispatch_cancelled() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("hang", "Never returns", json!({}), |_| async {
                futures::future::pending::<()>().await;
                Ok::<_, anyhow::Error>(String::new())
            })
            .unwrap();
        let message =
            Message::assistant_tool_calls(vec![ToolCall::function("c1", "hang", "{}")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = ToolDispatcher::new(&registry)
            .dispatch(&message, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = add_registry();
        let err = registry
            .register_fn("add", "again", json!({}), |_| async {
                Ok::<_, anyhow::Error>(String::new())
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool { ref name } if name == "add"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool_names(), vec!["add"]);
        assert_eq!(registry.definitions()[0].function.description, "Add two integers");
    }
}
