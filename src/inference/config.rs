//! Client and orchestrator configuration.
//!
//! Configuration comes from a `groq-chat.yaml` file (with `${VAR}` /
//! `${VAR:-default}` environment interpolation) or straight from the
//! environment via [`ClientConfig::from_env`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::ChatError;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub const DEFAULT_MODEL: &str = "mixtral-8x7b-32768";

const CONFIG_FILE_NAME: &str = "groq-chat.yaml";

/// Env var holding an explicit config file path.
const CONFIG_PATH_ENV: &str = "GROQ_CHAT_CONFIG";

const API_KEY_ENV: &str = "GROQ_API_KEY";
const BASE_URL_ENV: &str = "GROQ_BASE_URL";
const MODEL_ENV: &str = "GROQ_MODEL";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}
/// Streaming responses stay open for the whole generation, so the total
/// timeout is much longer than for buffered calls.
fn default_stream_timeout_secs() -> u64 {
    180
}
fn default_max_tool_rounds() -> u32 {
    10
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// When the client adds `response_format: {"type": "json_object"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatPolicy {
    /// Leave `response_format` as the caller set it.
    #[default]
    Never,
    /// Force JSON mode on every request.
    Always,
    /// Force JSON mode only on requests that carry tools.
    WithTools,
}

impl ResponseFormatPolicy {
    pub fn applies(self, has_tools: bool) -> bool {
        match self {
            ResponseFormatPolicy::Never => false,
            ResponseFormatPolicy::Always => true,
            ResponseFormatPolicy::WithTools => has_tools,
        }
    }
}

/// Endpoint, credentials, and timeouts for the completion client.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    /// Model used when a caller does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default)]
    pub response_format: ResponseFormatPolicy,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("default_model", &self.default_model)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .field("response_format", &self.response_format)
            .finish()
    }
}

impl ClientConfig {
    /// Defaults for everything except the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            api_key: api_key.into(),
            default_model: default_model(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
            response_format: ResponseFormatPolicy::default(),
        }
    }

    /// Read `GROQ_API_KEY` (required), `GROQ_BASE_URL` and `GROQ_MODEL`.
    pub fn from_env() -> Result<Self, ChatError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ChatError::config(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.default_model = model;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_response_format(mut self, policy: ResponseFormatPolicy) -> Self {
        self.response_format = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.base_url.trim().is_empty() {
            return Err(ChatError::config("base_url must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ChatError::config("api_key must not be empty"));
        }
        if self.default_model.trim().is_empty() {
            return Err(ChatError::config("default_model must not be empty"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

/// Tool-calling conversation loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of tool-dispatch rounds per conversation (default: 10).
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Await one round's tool calls together instead of one after another.
    #[serde(default)]
    pub concurrent_tools: bool,
    /// Receive each model turn as an SSE stream and fold it into a message.
    #[serde(default)]
    pub stream_responses: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            concurrent_tools: false,
            stream_responses: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.max_tool_rounds == 0 {
            return Err(ChatError::config("max_tool_rounds must be at least 1"));
        }
        Ok(())
    }
}

/// Top-level config file (mirrors `groq-chat.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `GROQ_CHAT_CONFIG` wins if it points at an existing file; otherwise
/// searches upward from `start` for `groq-chat.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ChatError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} does not point at a file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ChatError::config(format!("could not find {CONFIG_FILE_NAME}")))
}

/// Load, interpolate, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ChatError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ChatError::config(format!("failed to read {}: {e}", path.display())))?;

    let config = parse_config(&raw)?;
    tracing::info!(
        path = %path.display(),
        base_url = %config.client.base_url,
        model = %config.client.default_model,
        max_tool_rounds = config.orchestrator.max_tool_rounds,
        "loaded config"
    );
    Ok(config)
}

/// Parse config YAML text after environment interpolation.
pub fn parse_config(raw: &str) -> Result<AppConfig, ChatError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AppConfig = serde_yaml::from_str(&interpolated)
        .map_err(|e| ChatError::config(format!("failed to parse config: {e}")))?;
    config.client.validate()?;
    config.orchestrator.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
