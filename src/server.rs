//! HTTP gateway for browser clients.
//!
//! One streaming chat endpoint plus a health probe. The gateway validates
//! the request, opens a run against the graph service, and re-streams the
//! upstream body unchanged as Server-Sent Events.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::graph::{GraphClient, RunRequest};
use crate::session::ChatMessage;

/// Upper bound on the length of a chat message.
pub const MAX_MESSAGE_LEN: usize = 8192;
/// Upper bound on the length of a thread identifier.
pub const MAX_THREAD_ID_LEN: usize = 128;
/// Upper bound on the number of context messages in an edit resubmission.
pub const MAX_CONTEXT_MESSAGES: usize = 200;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    /// Client for the upstream graph service.
    pub client: Arc<GraphClient>,
    /// Gateway configuration.
    pub config: Arc<Config>,
}

/// Body of a chat request from the browser.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub thread_id: String,
    /// Graph to invoke; defaults to the chat graph.
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Conversation prefix preceding an edited turn.
    #[serde(default)]
    pub messages_before_edit: Option<Vec<ChatMessage>>,
}

/// Reject missing or oversized fields before anything streams.
fn validate(request: &ChatRequest) -> Option<&'static str> {
    if request.message.trim().is_empty() {
        return Some("message is required");
    }
    if request.message.len() > MAX_MESSAGE_LEN {
        return Some("message is too long");
    }
    if request.thread_id.trim().is_empty() {
        return Some("threadId is required");
    }
    if request.thread_id.len() > MAX_THREAD_ID_LEN {
        return Some("threadId is too long");
    }
    if let Some(context) = &request.messages_before_edit {
        if context.len() > MAX_CONTEXT_MESSAGES {
            return Some("messagesBeforeEdit is too large");
        }
    }
    None
}

/// Handler for the streaming chat endpoint.
async fn chat_handler(
    State(state): State<GatewayState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if let Some(error) = validate(&request) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response();
    }

    let mut run = RunRequest::new(&request.message, &request.thread_id)
        .with_model(state.config.model.clone())
        .with_k(state.config.retrieval_k)
        .with_filters(state.config.retrieval_filters.clone())
        .with_messages_before_edit(request.messages_before_edit);
    if let Some(assistant_id) = request.assistant_id {
        run = run.with_assistant_id(assistant_id);
    }

    match state.client.stream_run_bytes(&run).await {
        Ok(upstream) => (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(upstream),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("graph request failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Handler for the health probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    // Permissive CORS: the browser UI is served from a different origin in
    // development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the gateway until shutdown.
pub async fn serve(config: Config) -> color_eyre::Result<()> {
    let state = GatewayState {
        client: Arc::new(GraphClient::with_base_url(config.graph_base_url.clone())),
        config: Arc::new(config.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Start the gateway on a specific address as a background task.
///
/// This is useful for tests that need to bind to a random port.
pub async fn start_gateway(
    addr: SocketAddr,
    state: GatewayState,
) -> color_eyre::Result<(JoinHandle<()>, SocketAddr)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state)).await {
            tracing::error!("gateway error: {}", e);
        }
    });

    Ok((handle, actual_addr))
}
