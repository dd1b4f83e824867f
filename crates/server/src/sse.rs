//! Legacy MCP SSE transport.
//!
//! `GET <path>` opens an event stream whose first event (`endpoint`) tells the client where to
//! POST its JSON-RPC messages. Server messages are sent back as `message` events. Each stream is
//! one MCP session served by its own rmcp service task.

use crate::server::XrayMcpServer;
use crate::transport::health;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{Stream, StreamExt as _};
use parking_lot::RwLock;
use rmcp::ServiceExt as _;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, PollSender};

/// Where clients POST messages for an SSE session.
pub const MESSAGES_PATH: &str = "/messages/";

const CHANNEL_CAPACITY: usize = 64;

type SessionMap = Arc<RwLock<HashMap<String, mpsc::Sender<ClientJsonRpcMessage>>>>;

#[derive(Clone)]
struct SseState {
    server: XrayMcpServer,
    sessions: SessionMap,
    ct: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

/// Removes the session when the client's event stream goes away.
struct SessionGuard {
    id: String,
    sessions: SessionMap,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.write().remove(&self.id).is_some() {
            tracing::debug!(session_id = %self.id, "SSE session closed");
        }
    }
}

/// Router with the SSE stream at `path`, the message endpoint, and `GET /health`.
pub fn router(server: XrayMcpServer, path: &str, ct: CancellationToken) -> Router {
    let state = SseState {
        server,
        sessions: Arc::new(RwLock::new(HashMap::new())),
        ct,
    };

    Router::new()
        .route("/health", get(health))
        .route(path, get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route(MESSAGES_PATH.trim_end_matches('/'), post(post_message))
        .with_state(state)
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().simple().to_string();
    let (to_server_tx, to_server_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);
    let (to_client_tx, to_client_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);

    state
        .sessions
        .write()
        .insert(session_id.clone(), to_server_tx);
    tracing::debug!(session_id = %session_id, "SSE session opened");

    let incoming = futures::stream::unfold(to_server_rx, |mut rx| async move {
        rx.recv().await.map(|msg| (msg, rx))
    })
    .boxed();
    let transport = (PollSender::new(to_client_tx), incoming);

    let server = state.server.clone();
    let session_ct = state.ct.child_token();
    let task_session = session_id.clone();
    tokio::spawn(async move {
        match server.serve_with_ct(transport, session_ct).await {
            Ok(running) => {
                let _ = running.waiting().await;
            }
            Err(e) => {
                tracing::warn!(session_id = %task_session, "SSE session failed to initialize: {e}");
            }
        }
    });

    let guard = SessionGuard {
        id: session_id.clone(),
        sessions: Arc::clone(&state.sessions),
    };

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?session_id={session_id}"));

    let messages = futures::stream::unfold((to_client_rx, guard), |(mut rx, guard)| async move {
        let msg = rx.recv().await?;
        let event = Event::default()
            .event("message")
            .json_data(&msg)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to serialize SSE message: {e}");
                Event::default().comment("serialization error")
            });
        Some((event, (rx, guard)))
    });

    let stream = futures::stream::once(async move { endpoint })
        .chain(messages)
        .map(Ok)
        .take_until(state.ct.cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(tx) = state.sessions.read().get(&query.session_id).cloned() else {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON-RPC message: {e}"))
                .into_response();
        }
    };

    if tx.send(message).await.is_err() {
        return (StatusCode::NOT_FOUND, "Session is closed").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}
