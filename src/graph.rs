//! Client for the orchestration graph service.
//!
//! This module provides the HTTP client for the backend graph API: streaming
//! chat runs (Server-Sent Events), best-effort run cancellation, health
//! probing, and the document indexing operations.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::session::ChatMessage;
use crate::sse::{parse_data_line, FrameDecoder, StreamEvent, Utf8Decoder};

/// Default base URL of the graph service.
pub const GRAPH_BASE_URL: &str = "http://localhost:2024";
/// Assistant id of the conversational retrieval graph.
pub const CHAT_ASSISTANT_ID: &str = "chat";
/// Assistant id of the document indexing graph.
pub const INDEXER_ASSISTANT_ID: &str = "indexer";

/// Error type for graph client operations
#[derive(Debug)]
pub enum GraphError {
    /// HTTP request failed
    Http(reqwest::Error),
    /// JSON deserialization failed
    Json(serde_json::Error),
    /// Server returned an error status
    ServerError { status: u16, message: String },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::Http(e) => write!(f, "HTTP error: {}", e),
            GraphError::Json(e) => write!(f, "JSON error: {}", e),
            GraphError::ServerError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphError::Http(e) => Some(e),
            GraphError::Json(e) => Some(e),
            GraphError::ServerError { .. } => None,
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        GraphError::Http(e)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Json(e)
    }
}

/// A parsed run event stream.
pub type RunEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GraphError>> + Send>>;

/// Request for one streaming chat run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The user's query.
    pub query: String,
    /// Thread the run belongs to; also scopes document retrieval.
    pub thread_id: String,
    /// Graph to invoke; defaults to the chat graph.
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Chat model identifier forwarded to the graph.
    #[serde(default)]
    pub model: Option<String>,
    /// Number of documents the retrieval step fetches.
    #[serde(default)]
    pub k: Option<u32>,
    /// Metadata filters applied to retrieval.
    #[serde(default)]
    pub filters: HashMap<String, Value>,
    /// Conversation prefix carried along when resubmitting an edited turn.
    #[serde(default)]
    pub messages_before_edit: Option<Vec<ChatMessage>>,
}

impl RunRequest {
    /// Create a run request for `query` on `thread_id`.
    pub fn new(query: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            thread_id: thread_id.into(),
            assistant_id: None,
            model: None,
            k: None,
            filters: HashMap::new(),
            messages_before_edit: None,
        }
    }

    /// Target a specific graph instead of the default chat graph.
    pub fn with_assistant_id(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    /// Set the chat model identifier.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Set the retrieval result count.
    pub fn with_k(mut self, k: u32) -> Self {
        self.k = Some(k);
        self
    }

    /// Set the retrieval metadata filters.
    pub fn with_filters(mut self, filters: HashMap<String, Value>) -> Self {
        self.filters = filters;
        self
    }

    /// Attach the conversation prefix preceding an edited turn.
    pub fn with_messages_before_edit(mut self, messages: Option<Vec<ChatMessage>>) -> Self {
        self.messages_before_edit = messages;
        self
    }

    /// Body of the run-stream POST.
    pub(crate) fn to_run_body(&self) -> Value {
        let mut configurable = serde_json::Map::new();
        configurable.insert("session_id".to_string(), json!(self.thread_id));
        if let Some(model) = &self.model {
            configurable.insert("model".to_string(), json!(model));
        }
        if let Some(k) = self.k {
            configurable.insert("k".to_string(), json!(k));
        }
        if !self.filters.is_empty() {
            configurable.insert("filters".to_string(), json!(self.filters));
        }
        if let Some(messages) = &self.messages_before_edit {
            configurable.insert("messages_before_edit".to_string(), json!(messages));
        }

        json!({
            "assistant_id": self.assistant_id.as_deref().unwrap_or(CHAT_ASSISTANT_ID),
            "input": { "query": self.query },
            "config": { "configurable": Value::Object(configurable) },
            "stream_mode": ["messages"],
        })
    }
}

/// One indexed document, as reported by the graph's store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Store identifier of the document.
    pub id: String,
    /// Display name, when the upload carried one.
    #[serde(default)]
    pub name: Option<String>,
    /// Number of chunks produced at indexing time.
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<DocumentInfo>,
}

/// Client for the graph service API.
pub struct GraphClient {
    /// Base URL for the graph API
    pub base_url: String,
    /// Reusable HTTP client
    client: Client,
}

impl GraphClient {
    /// Create a new GraphClient with the default base URL.
    pub fn new() -> Self {
        Self {
            base_url: GRAPH_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Create a new GraphClient with a custom base URL.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// Start a chat run and return its parsed event stream.
    ///
    /// Sends a POST to the run-stream endpoint and decodes the response
    /// body through the frame pipeline. Fails before any decoding when the
    /// server rejects the run.
    pub async fn stream_run(&self, request: &RunRequest) -> Result<RunEventStream, GraphError> {
        let response = self.open_run(request).await?;
        let source = response.bytes_stream().map(|chunk| chunk.map_err(GraphError::from));
        Ok(decode_run_stream(source))
    }

    /// Start a chat run and return the raw byte stream, for pass-through
    /// re-streaming by the gateway.
    pub async fn stream_run_bytes(
        &self,
        request: &RunRequest,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, GraphError> {
        let response = self.open_run(request).await?;
        Ok(response.bytes_stream())
    }

    async fn open_run(&self, request: &RunRequest) -> Result<reqwest::Response, GraphError> {
        let url = format!("{}/threads/{}/runs/stream", self.base_url, request.thread_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&request.to_run_body())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GraphError::ServerError { status, message });
        }

        Ok(response)
    }

    /// Best-effort cancellation of a running chat run.
    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), GraphError> {
        let url = format!("{}/threads/{}/runs/{}/cancel", self.base_url, thread_id, run_id);

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GraphError::ServerError { status, message });
        }

        Ok(())
    }

    /// Check if the graph service is healthy and reachable.
    pub async fn health_check(&self) -> Result<bool, GraphError> {
        let url = format!("{}/ok", self.base_url);

        let response = self.client.get(&url).send().await?;

        Ok(response.status().is_success())
    }

    /// Index raw text into the store scoped to `session_id`.
    pub async fn index_text(&self, text: &str, session_id: &str) -> Result<(), GraphError> {
        self.run_indexer(json!({ "text": text }), session_id).await
    }

    /// Index a PDF into the store scoped to `session_id`.
    pub async fn index_pdf(&self, bytes: &[u8], session_id: &str) -> Result<(), GraphError> {
        self.run_indexer(json!({ "pdf_base64": BASE64.encode(bytes) }), session_id)
            .await
    }

    async fn run_indexer(&self, input: Value, session_id: &str) -> Result<(), GraphError> {
        let url = format!("{}/runs/wait", self.base_url);
        let body = json!({
            "assistant_id": INDEXER_ASSISTANT_ID,
            "input": input,
            "config": { "configurable": { "session_id": session_id } },
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GraphError::ServerError { status, message });
        }

        Ok(())
    }

    /// List documents indexed under `session_id`.
    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentInfo>, GraphError> {
        let url = format!("{}/store/documents", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("session_id", session_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GraphError::ServerError { status, message });
        }

        let body: DocumentsResponse = response.json().await?;
        Ok(body.documents)
    }

    /// Delete one indexed document under `session_id`.
    pub async fn delete_document(&self, id: &str, session_id: &str) -> Result<(), GraphError> {
        let url = format!("{}/store/documents/{}", self.base_url, id);

        let response = self
            .client
            .delete(&url)
            .query(&[("session_id", session_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GraphError::ServerError { status, message });
        }

        Ok(())
    }
}

impl Default for GraphClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a raw byte stream into parsed events.
///
/// The unfold state holds the byte source, the UTF-8 decoder, the frame
/// decoder, and the events already parsed from the current chunk. Events are
/// yielded in the exact order their frames appeared; frames that fail to
/// parse are dropped without ending the stream. Dropping the returned stream
/// drops the source with it, so the underlying connection is released on
/// every exit path: completion, error, or early abandonment.
pub fn decode_run_stream<S>(source: S) -> RunEventStream
where
    S: Stream<Item = Result<Bytes, GraphError>> + Send + Unpin + 'static,
{
    let event_stream = stream::unfold(
        (source, Utf8Decoder::new(), FrameDecoder::new(), VecDeque::new()),
        |(mut source, mut utf8, mut decoder, mut pending)| async move {
            loop {
                // Drain events parsed from earlier chunks first.
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (source, utf8, decoder, pending)));
                }

                match source.next().await {
                    Some(Ok(chunk)) => {
                        let text = utf8.push(&chunk);
                        for frame in decoder.feed(&text) {
                            if let Some(event) = parse_data_line(&frame) {
                                pending.push_back(event);
                            }
                        }
                        // Loop back to drain whatever the chunk produced.
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (source, utf8, decoder, pending)));
                    }
                    None => {
                        // An unterminated trailing frame cannot be decoded;
                        // complete upstream streams always end on a delimiter.
                        if !decoder.remainder().trim().is_empty() {
                            tracing::debug!(
                                "discarding incomplete trailing frame ({} bytes)",
                                decoder.remainder().len()
                            );
                        }
                        return None;
                    }
                }
            }
        },
    );

    Box::pin(event_stream)
}
