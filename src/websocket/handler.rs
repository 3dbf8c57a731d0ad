use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::metrics::{CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL};
use crate::registry::ConnectionHandle;
use crate::server::AppState;

use super::message::{ClientFrame, InboundEvent, ServerFrame};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler. Authentication happens before the lifecycle
/// manager is invoked; the token's subject becomes the connection's user ID.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = match extract_token(&query, &headers) {
        Some(t) => t,
        None => {
            return (StatusCode::UNAUTHORIZED, "Missing authentication token").into_response();
        }
    };

    let claims = match state.jwt_validator.validate(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "JWT validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    tracing::info!(user_id = %claims.sub, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Adapt one physical socket into the registry's connection abstraction:
/// register, run independent reader and writer loops, tear down on the
/// first loop to exit, and unregister exactly once.
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(user_id = %user_id))]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let connection_start = std::time::Instant::now();

    let (handle, outbound_rx, close_rx) =
        ConnectionHandle::new(user_id.clone(), state.settings.websocket.outbound_buffer);
    let connection_id = handle.id;

    state.registry.register(handle.clone());
    CONNECTIONS_OPENED_TOTAL.inc();

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (ws_sender, ws_receiver) = socket.split();

    let keepalive = Duration::from_secs(state.settings.websocket.keepalive_interval);
    let read_timeout = Duration::from_secs(state.settings.websocket.read_timeout);

    let mut write_task = tokio::spawn(write_loop(ws_sender, outbound_rx, close_rx, keepalive));

    let reader_state = state.clone();
    let reader_handle = handle.clone();
    let mut read_task = tokio::spawn(async move {
        read_loop(ws_receiver, reader_state, reader_handle, read_timeout).await;
    });

    // Whichever loop exits first triggers teardown of the other; no loop
    // may outlive the connection.
    tokio::select! {
        _ = &mut write_task => {
            tracing::debug!(connection_id = %connection_id, "Writer loop exited");
        }
        _ = &mut read_task => {
            tracing::debug!(connection_id = %connection_id, "Reader loop exited");
        }
    }

    handle.close();
    write_task.abort();
    read_task.abort();

    state.registry.unregister(&handle);
    CONNECTIONS_CLOSED_TOTAL.inc();

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Writer loop: drains the outbound queue onto the socket and sends a
/// keepalive probe on a fixed period. Exits when the queue is closed, the
/// close signal fires, or a write fails.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerFrame>,
    mut close_rx: watch::Receiver<bool>,
    keepalive: Duration,
) {
    let mut keepalive_timer = tokio::time::interval(keepalive);
    keepalive_timer.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
            frame = outbound_rx.recv() => {
                let frame = match frame {
                    Some(f) => f,
                    None => break,
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound frame");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = keepalive_timer.tick() => {
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_sender.close().await;
}

/// Reader loop: consumes inbound frames under a read deadline that any
/// frame (including keepalive acknowledgments) resets. Exits on deadline,
/// read error, or close frame.
async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: AppState,
    handle: Arc<ConnectionHandle>,
    read_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(read_timeout, ws_receiver.next()).await {
            Err(_) => {
                tracing::info!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    "Read deadline expired, closing connection"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => {
                if !process_message(msg, &state, &handle) {
                    break;
                }
            }
        }
    }
}

/// Process a received WebSocket message.
/// Returns false if the connection should be closed.
fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            let frame: ClientFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client frame");
                    let _ = state.registry.send(
                        &handle.user_id,
                        "error",
                        serde_json::json!({"code": "INVALID_FRAME", "message": e.to_string()}),
                    );
                    return true;
                }
            };
            handle_client_frame(frame, state, handle);
            true
        }
        // Binary frames are not part of the wire protocol
        Message::Binary(_) => true,
        // Axum answers pings automatically; both directions count as liveness
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

fn handle_client_frame(frame: ClientFrame, state: &AppState, handle: &Arc<ConnectionHandle>) {
    match frame {
        ClientFrame::Ping => {
            let _ = state
                .registry
                .send(&handle.user_id, "pong", serde_json::Value::Null);
        }
        ClientFrame::Event { event_type, data } => {
            // Republish on the shared broadcast path; lagging or absent
            // subscribers are fine, this is fan-out not delivery.
            let _ = state.inbound_tx.send(InboundEvent {
                user_id: handle.user_id.clone(),
                event_type,
                data,
            });
        }
    }
}
