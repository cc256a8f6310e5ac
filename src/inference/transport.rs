//! HTTP transport seam.
//!
//! The completion client never talks to `reqwest` directly; it hands an
//! [`HttpRequest`] to a [`Transport`] and gets back the status plus a live
//! body stream. The status is available before any body byte is read, so
//! error responses are rejected before a stream decoder is ever built.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::config::ClientConfig;
use super::errors::ChatError;

/// Response body as a stream of raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound call. `path` is relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Whether the caller intends to read the body incrementally.
    pub stream: bool,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            stream: false,
        }
    }

    pub fn post_json<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self, ChatError> {
        let body = serde_json::to_vec(body).map_err(|e| ChatError::InvalidRequest {
            reason: format!("failed to serialize request body: {e}"),
        })?;
        Ok(Self {
            method: Method::Post,
            path: path.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(body),
            stream: false,
        })
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self.headers.push(("Accept".into(), "text/event-stream".into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a response whose body has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Buffer the whole body as UTF-8 text.
    pub async fn text(mut self) -> Result<String, ChatError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        String::from_utf8(buf)
            .map_err(|e| ChatError::decode(format!("response body is not valid UTF-8: {e}")))
    }
}

/// Outbound HTTP capability. Implementations own connection reuse,
/// authentication headers, and any retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, ChatError>;
}

/// Race `fut` against `cancel`.
pub(crate) async fn until_cancelled<F, T>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        result = fut => result,
    }
}

// ─── ReqwestTransport ────────────────────────────────────────────────────────

/// `reqwest`-backed transport with bearer-token authentication.
pub struct ReqwestTransport {
    /// HTTP client for buffered requests.
    http: HttpClient,
    /// HTTP client for streaming requests (longer total timeout).
    http_stream: HttpClient,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatError::Transport {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.stream_timeout())
            .build()
            .map_err(|e| ChatError::Transport {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout(),
            stream_timeout: config.stream_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, ChatError> {
        let url = self.url(&request.path);
        let (client, timeout) = if request.stream {
            (&self.http_stream, self.stream_timeout)
        } else {
            (&self.http, self.request_timeout)
        };

        let mut builder = match request.method {
            Method::Get => client.get(&url),
            Method::Post => client.post(&url),
        }
        .bearer_auth(&self.api_key);

        let has_content_type = request.header(CONTENT_TYPE.as_str()).is_some();
        let has_accept = request.header(ACCEPT.as_str()).is_some();
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.stream && !has_accept {
            builder = builder.header(ACCEPT, "text/event-stream");
        }
        if let Some(body) = request.body {
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ChatError::Timeout {
                    duration_secs: timeout.as_secs(),
                }
            } else {
                ChatError::Transport {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        tracing::debug!(url = %url, status, stream = request.stream, "response headers received");

        let body = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| ChatError::Transport {
                endpoint: url.clone(),
                reason: format!("stream read error: {e}"),
            })
        });

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::stream;

    use super::*;

    struct Scripted {
        status: u16,
        chunks: Vec<Bytes>,
        /// Keep the body open after the last chunk.
        hang: bool,
    }

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn push(&self, status: u16, chunks: &[&str], hang: bool) -> &Self {
            self.responses.lock().unwrap().push_back(Scripted {
                status,
                chunks: chunks
                    .iter()
                    .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                    .collect(),
                hang,
            });
            self
        }

        pub(crate) fn respond(&self, status: u16, body: &str) -> &Self {
            self.push(status, &[body], false)
        }

        pub(crate) fn respond_chunks(&self, status: u16, chunks: &[&str]) -> &Self {
            self.push(status, chunks, false)
        }

        pub(crate) fn respond_then_hang(&self, status: u16, chunks: &[&str]) -> &Self {
            self.push(status, chunks, true)
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn request_json(&self, index: usize) -> serde_json::Value {
            let requests = self.requests.lock().unwrap();
            serde_json::from_slice(requests[index].body.as_deref().unwrap()).unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<TransportResponse, ChatError> {
            self.requests.lock().unwrap().push(request);
            let scripted = self.responses.lock().unwrap().pop_front().ok_or_else(|| {
                ChatError::Transport {
                    endpoint: "scripted".into(),
                    reason: "no scripted response left".into(),
                }
            })?;
            let chunks = stream::iter(scripted.chunks.into_iter().map(Ok::<_, ChatError>));
            let body: ByteStream = if scripted.hang {
                Box::pin(chunks.chain(stream::pending::<Result<Bytes, ChatError>>()))
            } else {
                Box::pin(chunks)
            };
            Ok(TransportResponse {
                status: scripted.status,
                body,
            })
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
