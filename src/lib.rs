//! Client library for the Groq chat completions API.
//!
//! - [`inference`]: wire types, the SSE stream decoder, and the completion client
//! - [`agent_core`]: tool registry, dispatcher, and the bounded tool-calling loop

pub mod agent_core;
pub mod inference;

use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub use agent_core::{
    AgentError, ConversationOutcome, Orchestrator, ToolDispatcher, ToolHandler, ToolRegistry,
};
pub use inference::{
    ChatError, ChatRequest, ClientConfig, CompletionClient, DeltaEvent, DeltaStream, Message,
    OrchestratorConfig, Role, Transport,
};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "groq_chat=info,warn";

/// Rotated log files kept next to the active one.
const LOG_FILES_KEPT: u32 = 3;

// ─── Tracing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    pub format: LogFormat,
    /// Write to this file (rotating older copies) instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// Install a stderr text subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    // Cannot fail without a log file.
    let _ = init_tracing_with(&TracingOptions::default());
}

/// Install a subscriber per `options`.
///
/// Only opening the log file can fail. If a global subscriber is already
/// installed this does nothing: the log file is neither rotated nor opened.
pub fn init_tracing_with(options: &TracingOptions) -> std::io::Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (writer, ansi) = match &options.log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, LOG_FILES_KEPT);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(FlushingWriter::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);

    let installed = match options.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            version = env!("CARGO_PKG_VERSION"),
            format = ?options.format,
            log_file = ?options.log_file,
            "tracing initialized"
        );
    }
    Ok(())
}

/// Rotate log files: `chat.log` → `chat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
