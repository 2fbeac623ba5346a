//! HTTP/SSE transport for the MCP server.
//!
//! ```text
//! Client                             Server
//!   │                                  │
//!   │── GET /sse ─────────────────────►│ (establish SSE connection)
//!   │◄── SSE: endpoint event ──────────│ (server sends message URL)
//!   │                                  │
//!   │── POST /message?sessionId=x ────►│ (JSON-RPC requests)
//!   │◄── SSE: message event ───────────│ (responses via SSE)
//!   │                                  │
//! ```

use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcResponse;
use crate::serve::McpServer;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// State for the MCP HTTP server.
#[derive(Clone)]
pub struct McpHttpState {
    pub server: McpServer,
    /// Active sessions (session_id -> response channel).
    sessions: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<JsonRpcResponse>>>>,
    /// Message endpoint advertised in the `endpoint` event.
    pub message_url: String,
}

impl McpHttpState {
    pub fn new(server: McpServer, message_url: impl Into<String>) -> Self {
        Self {
            server,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            message_url: message_url.into(),
        }
    }

    async fn register_session(&self, session_id: String, tx: mpsc::UnboundedSender<JsonRpcResponse>) {
        self.sessions.write().await.insert(session_id.clone(), tx);
        info!(session_id = %session_id, "MCP session registered");
    }

    async fn unregister_session(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            info!(session_id = %session_id, "MCP session unregistered");
        }
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Send a response to a specific session.
    async fn send_response(&self, session_id: &str, response: JsonRpcResponse) -> bool {
        match self.sessions.read().await.get(session_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// Create the MCP HTTP router.
pub fn create_mcp_router(state: McpHttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sse", get(mcp_sse))
        .route("/message", post(mcp_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve MCP over HTTP/SSE until the process ends.
pub async fn serve_sse(server: McpServer, addr: SocketAddr) -> McpResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| McpError::Bind { addr, source })?;
    let local = listener.local_addr()?;
    let state = McpHttpState::new(server, "/message");

    info!(address = %local, "MCP SSE server listening on http://{}/sse", local);
    axum::serve(listener, create_mcp_router(state)).await?;
    Ok(())
}

/// Removes its session when the SSE stream is dropped, which is how axum
/// reports a client disconnect.
struct SessionGuard {
    state: McpHttpState,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { state.unregister_session(&session_id).await });
            }
            Err(_) => warn!(session_id = %session_id, "No runtime to unregister MCP session"),
        }
    }
}

/// SSE connection handler.
async fn mcp_sse(
    State(state): State<McpHttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    state.register_session(session_id.clone(), tx).await;

    Sse::new(session_events(state, session_id, rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Events for one session: the `endpoint` event, then every response.
fn session_events(
    state: McpHttpState,
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let message_url = format!("{}?sessionId={}", state.message_url, session_id);
    info!(session_id = %session_id, message_url = %message_url, "MCP SSE connection established");

    let guard = SessionGuard { state, session_id };

    async_stream::stream! {
        let _guard = guard;

        // The 2024-11-05 transport expects the bare URL as endpoint data
        yield Ok(Event::default().event("endpoint").data(message_url));

        while let Some(response) = rx.recv().await {
            if let Ok(data) = serde_json::to_string(&response) {
                yield Ok(Event::default().event("message").data(data));
            }
        }
    }
}

/// Query parameters for message endpoint.
#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Message endpoint handler. The body is parsed by the server so malformed
/// JSON still produces a JSON-RPC parse error on the stream.
async fn mcp_message(
    State(state): State<McpHttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> impl IntoResponse {
    debug!(session_id = %query.session_id, bytes = body.len(), "Received MCP message");

    if !state.has_session(&query.session_id).await {
        warn!(session_id = %query.session_id, "Message for unknown session");
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Session not found" })),
        );
    }

    if let Some(response) = state.server.handle_message(&body).await {
        if !state.send_response(&query.session_id, response).await {
            warn!(session_id = %query.session_id, "Failed to send response - session closed");
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Session not found" })),
            );
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "ok" })),
    )
}
