//! Conversation state and the streaming submission lifecycle.
//!
//! [`ChatSession`] owns the message list, the connection phase, and the
//! in-flight run tracking for one conversation. A submission spawns a task
//! that consumes the run's event stream and reports progress back over a
//! channel as [`SessionUpdate`]s; the session owner drains the channel and
//! applies each update. One submission may be in flight at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::graph::{GraphClient, RunRequest};

/// Shown in place of an answer when a submission fails before any content
/// has streamed.
pub const PROCESSING_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while processing your request.";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Submitting,
    Error,
}

/// Progress reported by the stream task back to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// The run identifier became known.
    RunStarted { run_id: String },
    /// Full accumulated assistant text so far; replaces the open message.
    AssistantMessage {
        content: String,
        message_id: Option<String>,
    },
    /// Message-id to graph-node attribution from a metadata event.
    Sources { nodes: HashMap<String, String> },
    /// The run failed. `message` is the upstream or transport error.
    Failed { message: String },
    /// The run was cancelled cooperatively; not a failure.
    Interrupted,
    /// The run finished normally.
    Completed,
}

/// Why a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("a submission is already in flight")]
    Busy,
    #[error("session is not connected")]
    NotConnected,
    #[error("cannot submit an empty message")]
    EmptyInput,
    #[error("no user message to retry")]
    NothingToRetry,
    #[error("index does not address a user message")]
    NotAUserMessage,
}

/// One conversation against the graph service.
pub struct ChatSession {
    client: Arc<GraphClient>,
    config: Config,
    thread_id: String,
    messages: Vec<ChatMessage>,
    /// Message-id to graph-node attribution collected this conversation.
    sources: HashMap<String, String>,
    phase: SessionPhase,
    /// Run identifier of the in-flight submission, used only to cancel.
    run_id: Option<String>,
    /// Whether any assistant content arrived during the current turn.
    streamed_this_turn: bool,
    /// User-facing failure notice for the last turn.
    notice: Option<String>,
    update_tx: mpsc::UnboundedSender<SessionUpdate>,
    update_rx: mpsc::UnboundedReceiver<SessionUpdate>,
    stream_task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Create a session for a fresh thread.
    pub fn new(client: Arc<GraphClient>, config: Config) -> Self {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Self {
            client,
            config,
            thread_id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            sources: HashMap::new(),
            phase: SessionPhase::Idle,
            run_id: None,
            streamed_this_turn: false,
            notice: None,
            update_tx,
            update_rx,
            stream_task: None,
        }
    }

    /// Probe the graph service and move to `Connected` or `Error`.
    pub async fn connect(&mut self) -> bool {
        self.phase = SessionPhase::Connecting;
        if self.config.skip_health_check {
            self.phase = SessionPhase::Connected;
            return true;
        }

        match self.client.health_check().await {
            Ok(true) => {
                self.phase = SessionPhase::Connected;
                true
            }
            Ok(false) => {
                tracing::warn!("graph service health probe failed");
                self.phase = SessionPhase::Error;
                false
            }
            Err(e) => {
                tracing::warn!("graph service unreachable: {}", e);
                self.phase = SessionPhase::Error;
                false
            }
        }
    }

    /// The conversation so far.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Message-id to graph-node attribution collected so far.
    pub fn sources(&self) -> &HashMap<String, String> {
        &self.sources
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Thread identifier the graph scopes this conversation by.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Whether a submission is in flight.
    pub fn is_submitting(&self) -> bool {
        self.phase == SessionPhase::Submitting
    }

    /// Take the pending user-facing failure notice, if any.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Submit a user message.
    ///
    /// Rejected while a submission is in flight or when the session is not
    /// connected; rejection never mutates the conversation.
    pub fn submit(&mut self, text: &str) -> Result<(), SubmitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }
        if self.is_submitting() {
            return Err(SubmitError::Busy);
        }
        if self.phase != SessionPhase::Connected {
            return Err(SubmitError::NotConnected);
        }

        self.begin_turn(text, None);
        Ok(())
    }

    /// Stop the in-flight submission.
    ///
    /// Aborts the local stream task immediately, requests server-side
    /// cancellation best-effort with the tracked run id, and leaves the
    /// submitting state unconditionally. Calling this while idle is a no-op
    /// and it never fails the caller.
    pub fn stop(&mut self) {
        if !self.is_submitting() {
            return;
        }

        if let Some(task) = self.stream_task.take() {
            task.abort();
        }

        // Apply whatever the task reported before it was aborted, so partial
        // content that already arrived is kept.
        while let Ok(update) = self.update_rx.try_recv() {
            self.handle_update(update);
        }

        if let Some(run_id) = self.run_id.take() {
            let client = Arc::clone(&self.client);
            let thread_id = self.thread_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.cancel_run(&thread_id, &run_id).await {
                    tracing::debug!("cancel request failed: {}", e);
                }
            });
        }

        self.drop_empty_placeholder();
        self.phase = SessionPhase::Connected;
    }

    /// Resubmit the most recent user message, discarding everything after it.
    pub fn retry(&mut self) -> Result<(), SubmitError> {
        if self.is_submitting() {
            return Err(SubmitError::Busy);
        }
        if self.phase != SessionPhase::Connected {
            return Err(SubmitError::NotConnected);
        }
        let index = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or(SubmitError::NothingToRetry)?;

        let text = self.messages[index].content.clone();
        self.messages.truncate(index);
        self.begin_turn(&text, None);
        Ok(())
    }

    /// Replace the user message at `index` with `text` and resubmit,
    /// discarding everything from `index` on. The preceding conversation is
    /// carried along as context for the graph.
    pub fn edit_and_resubmit(&mut self, index: usize, text: &str) -> Result<(), SubmitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }
        if self.is_submitting() {
            return Err(SubmitError::Busy);
        }
        if self.phase != SessionPhase::Connected {
            return Err(SubmitError::NotConnected);
        }
        if self.messages.get(index).map(|m| m.role) != Some(Role::User) {
            return Err(SubmitError::NotAUserMessage);
        }

        let context = self.messages[..index].to_vec();
        self.messages.truncate(index);
        let context = if context.is_empty() { None } else { Some(context) };
        self.begin_turn(text, context);
        Ok(())
    }

    /// Abandon the current conversation and start a fresh thread.
    pub fn new_conversation(&mut self) {
        self.stop();
        self.messages.clear();
        self.sources.clear();
        self.notice = None;
        self.thread_id = uuid::Uuid::new_v4().to_string();
    }

    /// Apply one update from the stream task.
    pub fn handle_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::RunStarted { run_id } => {
                if self.run_id.is_none() {
                    self.run_id = Some(run_id);
                }
            }
            SessionUpdate::AssistantMessage { content, .. } => {
                self.streamed_this_turn = true;
                if let Some(last) = self.messages.last_mut() {
                    if last.role == Role::Assistant {
                        last.content = content;
                    }
                }
            }
            SessionUpdate::Sources { nodes } => {
                self.sources.extend(nodes);
            }
            SessionUpdate::Failed { message } => {
                if self.streamed_this_turn {
                    // The user keeps what the run managed to produce.
                    tracing::warn!("stream failed after partial content: {}", message);
                } else {
                    if let Some(last) = self.messages.last_mut() {
                        if last.role == Role::Assistant && last.content.is_empty() {
                            last.content = PROCESSING_ERROR_MESSAGE.to_string();
                        }
                    }
                    self.notice = Some(message);
                }
                self.finish_turn();
            }
            SessionUpdate::Interrupted => {
                self.drop_empty_placeholder();
                self.finish_turn();
            }
            SessionUpdate::Completed => {
                self.finish_turn();
            }
        }
    }

    /// Drain and apply updates until the in-flight submission settles.
    pub async fn run_until_settled(&mut self) {
        while self.is_submitting() {
            match self.update_rx.recv().await {
                Some(update) => self.handle_update(update),
                None => break,
            }
        }
    }

    fn begin_turn(&mut self, text: &str, messages_before_edit: Option<Vec<ChatMessage>>) {
        // Discard leftovers from a previous aborted turn.
        while let Ok(stale) = self.update_rx.try_recv() {
            tracing::debug!("discarding stale update: {:?}", stale);
        }

        self.messages.push(ChatMessage::user(text));
        self.messages.push(ChatMessage::assistant(""));
        self.run_id = None;
        self.streamed_this_turn = false;
        self.notice = None;
        self.phase = SessionPhase::Submitting;

        let request = RunRequest::new(text, &self.thread_id)
            .with_model(self.config.model.clone())
            .with_k(self.config.retrieval_k)
            .with_filters(self.config.retrieval_filters.clone())
            .with_messages_before_edit(messages_before_edit);

        let client = Arc::clone(&self.client);
        let update_tx = self.update_tx.clone();
        let route_limit = self.config.route_payload_max_len;

        self.stream_task = Some(tokio::spawn(async move {
            run_stream_task(client, request, route_limit, update_tx).await;
        }));
    }

    fn finish_turn(&mut self) {
        self.run_id = None;
        self.stream_task = None;
        if self.is_submitting() {
            self.phase = SessionPhase::Connected;
        }
    }

    fn drop_empty_placeholder(&mut self) {
        if let Some(last) = self.messages.last() {
            if last.role == Role::Assistant && last.content.is_empty() {
                self.messages.pop();
            }
        }
    }
}

/// Consume one run's event stream and report progress over `update_tx`.
async fn run_stream_task(
    client: Arc<GraphClient>,
    request: RunRequest,
    route_limit: usize,
    update_tx: mpsc::UnboundedSender<SessionUpdate>,
) {
    let mut stream = match client.stream_run(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = update_tx.send(SessionUpdate::Failed {
                message: e.to_string(),
            });
            return;
        }
    };

    let mut run_seen = false;
    while let Some(result) = stream.next().await {
        match result {
            Ok(event) => {
                if !run_seen {
                    if let Some(run_id) = event.run_id() {
                        run_seen = true;
                        let _ = update_tx.send(SessionUpdate::RunStarted { run_id });
                    }
                }

                let nodes = event.node_sources();
                if !nodes.is_empty() {
                    let _ = update_tx.send(SessionUpdate::Sources { nodes });
                }

                if event.is_error() {
                    if event.is_interrupt() {
                        let _ = update_tx.send(SessionUpdate::Interrupted);
                    } else {
                        let message = event
                            .error_message()
                            .unwrap_or_else(|| "Unknown upstream error".to_string());
                        let _ = update_tx.send(SessionUpdate::Failed { message });
                    }
                    return;
                }

                if let Some(chunk) = event.message_chunk(route_limit) {
                    let _ = update_tx.send(SessionUpdate::AssistantMessage {
                        content: chunk.content,
                        message_id: chunk.message_id,
                    });
                }
            }
            Err(e) => {
                let _ = update_tx.send(SessionUpdate::Failed {
                    message: e.to_string(),
                });
                return;
            }
        }
    }

    let _ = update_tx.send(SessionUpdate::Completed);
}
