//! SSE streaming response decoder for chat completions.
//!
//! Reads a transport byte stream, reassembles lines across chunk boundaries,
//! and turns each `data: …` line into a [`DeltaEvent`]. The sequence is
//! pull-based: every call to [`DeltaStream::next_event`] decodes at most one
//! event, and the only suspension point is awaiting the next chunk from the
//! transport.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::ChatError;
use super::transport::ByteStream;
use super::types::{DeltaEvent, Message, ToolCall};

/// Prefix that marks an event line.
const DATA_PREFIX: &str = "data: ";

/// Payload that marks clean end of stream.
const DONE_SENTINEL: &str = "[DONE]";

// ─── Line reassembly ─────────────────────────────────────────────────────────

/// Buffers raw bytes until a full `\n`-terminated line is available.
///
/// Lines come back undecoded. Only `data: ` payloads need to be UTF-8, so a
/// multi-byte sequence split across two reads is reassembled intact and a
/// non-UTF-8 comment line never fails. A trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes before this offset are known to contain no `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let offset = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
        let Some(offset) = offset else {
            self.scanned = self.buf.len();
            return None;
        };
        let end = self.scanned + offset;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        self.scanned = 0;
        line.pop(); // '\n'
        strip_cr(&mut line);
        Some(line)
    }

    /// Take whatever partial line is left once the source is exhausted.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        strip_cr(&mut line);
        Some(line)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn strip_cr(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

// ─── Line classification ─────────────────────────────────────────────────────

/// What one complete line means to the decoder.
#[derive(Debug, PartialEq)]
enum DecodedLine {
    /// Comment, keep-alive, `event:` field, blank separator.
    Ignored,
    /// The `[DONE]` sentinel.
    Done,
    Event(DeltaEvent),
}

fn decode_line(line: &[u8]) -> Result<DecodedLine, ChatError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX.as_bytes()) else {
        return Ok(DecodedLine::Ignored);
    };
    let payload = std::str::from_utf8(payload)
        .map_err(|e| ChatError::decode(format!("SSE data payload is not valid UTF-8: {e}")))?;
    if payload.trim_start().starts_with(DONE_SENTINEL) {
        return Ok(DecodedLine::Done);
    }
    DeltaEvent::from_json(payload).map(DecodedLine::Event)
}

// ─── DeltaStream ─────────────────────────────────────────────────────────────

/// Why a [`DeltaStream`] stopped producing events.
///
/// `Sentinel` and `EndOfInput` both mean the response completed; they are
/// kept apart for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Sentinel,
    EndOfInput,
    Failed,
    Cancelled,
}

impl StreamEnd {
    pub fn is_complete(self) -> bool {
        matches!(self, StreamEnd::Sentinel | StreamEnd::EndOfInput)
    }
}

enum Read {
    Chunk(Bytes),
    Failed(ChatError),
    Exhausted,
    Cancelled,
}

/// Lazy, single-pass sequence of [`DeltaEvent`]s over an open response body.
///
/// Once it ends (sentinel, end of input, error, or cancellation) it stays
/// ended: further pulls return `None`. The body stream is dropped as soon as
/// the sequence ends, which releases the underlying connection.
pub struct DeltaStream {
    body: Option<ByteStream>,
    lines: LineBuffer,
    cancel: CancellationToken,
    end: Option<StreamEnd>,
    events: usize,
}

impl DeltaStream {
    pub fn new(body: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            body: Some(body),
            lines: LineBuffer::new(),
            cancel,
            end: None,
            events: 0,
        }
    }

    /// `None` while the stream is still open.
    pub fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Number of events yielded so far.
    pub fn events_yielded(&self) -> usize {
        self.events
    }

    /// Pull the next event.
    pub async fn next_event(&mut self) -> Option<Result<DeltaEvent, ChatError>> {
        loop {
            if self.end.is_some() {
                return None;
            }
            if self.cancel.is_cancelled() {
                return self.fail(StreamEnd::Cancelled, ChatError::Cancelled);
            }

            if let Some(line) = self.lines.next_line() {
                match self.handle_line(line) {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }

            match self.read_chunk().await {
                Read::Chunk(bytes) => self.lines.push(&bytes),
                Read::Failed(e) => return self.fail(StreamEnd::Failed, e),
                Read::Cancelled => {
                    tracing::debug!(events = self.events, "stream cancelled mid-read");
                    return self.fail(StreamEnd::Cancelled, ChatError::Cancelled);
                }
                Read::Exhausted => {
                    self.body = None;
                    if let Some(line) = self.lines.take_remainder() {
                        if let Some(item) = self.handle_line(line) {
                            return Some(item);
                        }
                    }
                    if self.end.is_none() {
                        tracing::debug!(events = self.events, "stream ended without [DONE]");
                        self.finish(StreamEnd::EndOfInput);
                    }
                    return None;
                }
            }
        }
    }

    /// Turn this decoder into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<DeltaEvent, ChatError>> + Send {
        stream::unfold(self, |mut decoder| async move {
            decoder.next_event().await.map(|item| (item, decoder))
        })
    }

    /// Drain the remaining events into a `Vec`, stopping at the first error.
    pub async fn collect_events(mut self) -> Result<Vec<DeltaEvent>, ChatError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event?);
        }
        Ok(events)
    }

    async fn read_chunk(&mut self) -> Read {
        let Some(body) = self.body.as_mut() else {
            return Read::Exhausted;
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Read::Cancelled,
            next = body.next() => match next {
                Some(Ok(bytes)) => Read::Chunk(bytes),
                Some(Err(e)) => Read::Failed(e),
                None => Read::Exhausted,
            },
        }
    }

    /// `None` means the line produced nothing and decoding should continue.
    fn handle_line(&mut self, line: Vec<u8>) -> Option<Result<DeltaEvent, ChatError>> {
        match decode_line(&line) {
            Ok(DecodedLine::Ignored) => None,
            Ok(DecodedLine::Done) => {
                self.finish(StreamEnd::Sentinel);
                None
            }
            Ok(DecodedLine::Event(event)) => {
                self.events += 1;
                Some(Ok(event))
            }
            Err(e) => {
                tracing::warn!(error = %e, events = self.events, "malformed SSE payload");
                self.fail(StreamEnd::Failed, e)
            }
        }
    }

    fn finish(&mut self, end: StreamEnd) {
        self.end = Some(end);
        self.body = None;
    }

    fn fail(
        &mut self,
        end: StreamEnd,
        error: ChatError,
    ) -> Option<Result<DeltaEvent, ChatError>> {
        self.finish(end);
        Some(Err(error))
    }
}

// ─── Accumulation ────────────────────────────────────────────────────────────

/// In-progress tool call assembled from streamed fragments.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds a sequence of [`DeltaEvent`]s into one assistant [`Message`].
///
/// Text fragments are concatenated. Tool call fragments are merged by their
/// `index` and emitted in index order.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    content: String,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    finish_reason: Option<String>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &DeltaEvent) {
        let Some(choice) = event.chunk().choices.first() else {
            return;
        };

        if let Some(content) = choice.delta.content.as_deref() {
            self.content.push_str(content);
        }

        for fragment in choice.delta.tool_calls.iter().flatten() {
            let pending = self.tool_calls.entry(fragment.index).or_default();
            if fragment.id.is_some() {
                pending.id.clone_from(&fragment.id);
            }
            if let Some(f) = &fragment.function {
                if let Some(name) = &f.name {
                    pending.name.push_str(name);
                }
                if let Some(args) = &f.arguments {
                    pending.arguments.push_str(args);
                }
            }
        }

        if choice.finish_reason.is_some() {
            self.finish_reason.clone_from(&choice.finish_reason);
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn into_message(self) -> Message {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|p| ToolCall::function(p.id.unwrap_or_default(), p.name, p.arguments))
            .collect();

        let mut message = if tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            let mut m = Message::assistant_tool_calls(tool_calls);
            if !self.content.is_empty() {
                m.content = Some(self.content);
            }
            m
        };
        message.ensure_tool_call_ids();
        message
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
