//! Analysis service client.
//!
//! Defines the [`AnalysisService`] trait the orchestrator drives and
//! [`RagflowClient`], its implementation over the RAGFlow HTTP API (v1).
//!
//! Every JSON response uses the envelope `{"code": 0, "message": ..., "data": ...}`.
//! A non-zero `code`, a non-2xx status without an envelope, or a transport
//! failure becomes a [`ServiceError`] naming the operation. Nothing is
//! retried.
//!
//! # Streaming answers
//!
//! `POST /api/v1/chats/{chat_id}/completions` with `stream: true` answers with
//! Server-Sent Events. Each `data:` line carries an envelope whose `data` is
//! either `{"answer": "<text so far>", ...}` or the literal `true`, which ends
//! the exchange. [`AnalysisService::ask`] exposes this as a [`Stream`] of
//! [`AnswerSnapshot`]s; each snapshot holds the whole answer accumulated so
//! far, not a delta.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::error::ServiceError;
use crate::models::{AnswerSnapshot, Assistant, ChunkConfig, Dataset, Document, Session};

/// Lazily produced answer snapshots, ending when the service signals completion.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<AnswerSnapshot, ServiceError>> + Send>>;

/// Operations the orchestrator needs from the retrieval/analysis service.
///
/// Each method is a single remote call with no local state, so test doubles
/// can implement it with plain in-memory collections.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, ServiceError>;

    async fn create_dataset(
        &self,
        name: &str,
        description: &str,
        embedding_model: &str,
        chunk: ChunkConfig,
    ) -> Result<Dataset, ServiceError>;

    /// Documents in `dataset_id` whose display name equals `name`.
    async fn find_documents(
        &self,
        dataset_id: &str,
        name: &str,
    ) -> Result<Vec<Document>, ServiceError>;

    async fn upload_document(
        &self,
        dataset_id: &str,
        display_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ServiceError>;

    /// Start parsing. Returns as soon as the service accepts the request.
    async fn trigger_parse(
        &self,
        dataset_id: &str,
        document_ids: &[String],
    ) -> Result<(), ServiceError>;

    async fn document_status(
        &self,
        dataset_id: &str,
        document_id: &str,
    ) -> Result<Document, ServiceError>;

    async fn list_assistants(&self) -> Result<Vec<Assistant>, ServiceError>;

    async fn create_assistant(
        &self,
        name: &str,
        dataset_ids: &[String],
    ) -> Result<Assistant, ServiceError>;

    async fn create_session(&self, assistant_id: &str, name: &str)
        -> Result<Session, ServiceError>;

    async fn ask(&self, session: &Session, question: &str) -> Result<AnswerStream, ServiceError>;
}

/// [`AnalysisService`] over the RAGFlow HTTP API.
pub struct RagflowClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl RagflowClient {
    /// Create a client from the `[analysis]` config section.
    ///
    /// # Errors
    ///
    /// Fails if no API key is configured (`analysis.api_key` or
    /// `RAGFLOW_API_KEY`).
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("analysis API key not set (RAGFLOW_API_KEY)"))?;
        Self::new(&config.base_url, &api_key, Duration::from_secs(config.timeout_secs))
    }

    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        // Only the connect phase is bounded client-wide; streamed answers can
        // legitimately run for minutes. JSON calls set a per-request timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build analysis service HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Send a JSON request and unwrap the response envelope into `T`.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        req: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ServiceError::new(operation, e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ServiceError::new(operation, e))?;

        let envelope: Value = serde_json::from_str(&body).map_err(|_| {
            ServiceError::new(
                operation,
                format!("HTTP {}: {}", status, truncate(&body, 300)),
            )
        })?;

        decode_envelope(operation, envelope)
    }
}

#[async_trait]
impl AnalysisService for RagflowClient {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, ServiceError> {
        let req = self
            .http
            .get(self.url("/datasets"))
            .query(&[("page", "1"), ("page_size", "1000")]);
        let datasets: Option<Vec<Dataset>> = self.call("list_datasets", req).await?;
        Ok(datasets.unwrap_or_default())
    }

    async fn create_dataset(
        &self,
        name: &str,
        description: &str,
        embedding_model: &str,
        chunk: ChunkConfig,
    ) -> Result<Dataset, ServiceError> {
        let body = serde_json::json!({
            "name": name,
            "avatar": "",
            "description": description,
            "embedding_model": embedding_model,
            "permission": "me",
            "chunk_method": "naive",
            "parser_config": chunk,
        });
        let req = self.http.post(self.url("/datasets")).json(&body);
        self.call("create_dataset", req).await
    }

    async fn find_documents(
        &self,
        dataset_id: &str,
        name: &str,
    ) -> Result<Vec<Document>, ServiceError> {
        let req = self
            .http
            .get(self.url(&format!("/datasets/{}/documents", dataset_id)))
            .query(&[("keywords", name), ("page", "1"), ("page_size", "1000")]);
        let list: DocumentList = self.call("find_documents", req).await?;

        // `keywords` is a substring match on the service side.
        Ok(list
            .docs
            .into_iter()
            .filter(|d| d.name.as_deref() == Some(name))
            .collect())
    }

    async fn upload_document(
        &self,
        dataset_id: &str,
        display_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(display_name.to_string()));
        let req = self
            .http
            .post(self.url(&format!("/datasets/{}/documents", dataset_id)))
            .multipart(form);
        let _: Value = self.call("upload_document", req).await?;
        Ok(())
    }

    async fn trigger_parse(
        &self,
        dataset_id: &str,
        document_ids: &[String],
    ) -> Result<(), ServiceError> {
        let req = self
            .http
            .post(self.url(&format!("/datasets/{}/chunks", dataset_id)))
            .json(&serde_json::json!({ "document_ids": document_ids }));
        let _: Value = self.call("trigger_parse", req).await?;
        Ok(())
    }

    async fn document_status(
        &self,
        dataset_id: &str,
        document_id: &str,
    ) -> Result<Document, ServiceError> {
        let req = self
            .http
            .get(self.url(&format!("/datasets/{}/documents", dataset_id)))
            .query(&[("id", document_id)]);
        let list: DocumentList = self.call("document_status", req).await?;
        list.docs.into_iter().next().ok_or_else(|| {
            ServiceError::new("document_status", format!("document {} not found", document_id))
        })
    }

    async fn list_assistants(&self) -> Result<Vec<Assistant>, ServiceError> {
        let req = self
            .http
            .get(self.url("/chats"))
            .query(&[("page", "1"), ("page_size", "1000")]);
        let assistants: Option<Vec<Assistant>> = self.call("list_assistants", req).await?;
        Ok(assistants.unwrap_or_default())
    }

    async fn create_assistant(
        &self,
        name: &str,
        dataset_ids: &[String],
    ) -> Result<Assistant, ServiceError> {
        let req = self
            .http
            .post(self.url("/chats"))
            .json(&serde_json::json!({ "name": name, "dataset_ids": dataset_ids }));
        self.call("create_assistant", req).await
    }

    async fn create_session(
        &self,
        assistant_id: &str,
        name: &str,
    ) -> Result<Session, ServiceError> {
        let req = self
            .http
            .post(self.url(&format!("/chats/{}/sessions", assistant_id)))
            .json(&serde_json::json!({ "name": name }));
        let created: CreatedSession = self.call("create_session", req).await?;
        Ok(Session {
            id: created.id,
            assistant_id: assistant_id.to_string(),
            name: created.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn ask(&self, session: &Session, question: &str) -> Result<AnswerStream, ServiceError> {
        let resp = self
            .http
            .post(self.url(&format!("/chats/{}/completions", session.assistant_id)))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "question": question,
                "stream": true,
                "session_id": session.id,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::new("ask", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::new(
                "ask",
                format!("HTTP {}: {}", status, truncate(&body, 300)),
            ));
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(answer_stream(bytes))
    }
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    docs: Vec<Document>,
}

#[derive(Deserialize)]
struct CreatedSession {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// Check `code` and deserialize `data` into `T`.
fn decode_envelope<T: DeserializeOwned>(operation: &str, mut envelope: Value) -> Result<T, ServiceError> {
    let code = envelope.get("code").and_then(Value::as_i64).ok_or_else(|| {
        ServiceError::new(operation, "response is missing the `code` field")
    })?;

    if code != 0 {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return Err(ServiceError::new(
            operation,
            format!("code {}: {}", code, message),
        ));
    }

    let data = envelope
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null);
    serde_json::from_value(data)
        .map_err(|e| ServiceError::new(operation, format!("unexpected response shape: {}", e)))
}

// ============ SSE decoding ============

/// Event carried by one `data:` line of the completion stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Snapshot(String),
    Done,
}

/// Splits a byte stream into lines. Bytes are buffered until a newline so a
/// multi-byte character split across chunks is never decoded in halves.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line[..end]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Interpret one SSE line. `None` for lines that carry nothing of interest
/// (blank lines, comments, `event:` fields, keep-alive payloads).
fn parse_sse_line(line: &str) -> Option<Result<SseEvent, ServiceError>> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }

    let envelope: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            return Some(Err(ServiceError::new(
                "ask",
                format!("malformed stream event: {}", truncate(payload, 200)),
            )))
        }
    };

    let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return Some(Err(ServiceError::new(
            "ask",
            format!("code {}: {}", code, message),
        )));
    }

    match envelope.get("data") {
        Some(Value::Bool(_)) => Some(Ok(SseEvent::Done)),
        Some(Value::Object(data)) => data
            .get("answer")
            .and_then(Value::as_str)
            .map(|answer| Ok(SseEvent::Snapshot(answer.to_string()))),
        _ => None,
    }
}

struct AnswerState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    eof: bool,
    finished: bool,
}

/// Turn the raw completion body into a stream of snapshots.
fn answer_stream(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> AnswerStream {
    let state = AnswerState {
        bytes,
        lines: LineBuffer::default(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            while let Some(line) = state.lines.next_line() {
                match parse_sse_line(&line) {
                    None => continue,
                    Some(Ok(SseEvent::Snapshot(text))) => {
                        return Some((Ok(AnswerSnapshot { text }), state));
                    }
                    Some(Ok(SseEvent::Done)) => return None,
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.eof {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.lines.push(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ServiceError::new("ask", e)), state));
                }
                None => {
                    // Flush a final line that arrived without a newline.
                    state.lines.push(b"\n");
                    state.eof = true;
                }
            }
        }
    })
    .boxed()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
