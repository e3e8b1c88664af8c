use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use ringfire_shared::protocol::{PeerMsg, RelayMsg, SubscribedMsg, PROTOCOL_VERSION};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::config::RelayConfig;
use crate::hub::{ChannelHub, Frame};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: ChannelHub,
    pub config: Arc<RelayConfig>,
    pub connection_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            hub: ChannelHub::new(config.channel_capacity),
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
        }
    }
}

/// Longest accepted channel name
const MAX_CHANNEL_NAME: usize = 64;

fn valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHANNEL_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// HTTP handler for WebSocket upgrade on `/ws/{channel}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(app_state): State<AppState>,
) -> Response {
    if !valid_channel_name(&channel) {
        return (StatusCode::BAD_REQUEST, "invalid channel name").into_response();
    }

    let permit = match app_state.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(channel = %channel, "Connection limit reached, rejecting upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, channel, app_state, permit))
}

/// Fixed one-second window counter.
struct RateWindow {
    started: Instant,
    count: u32,
    limit: u32,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        Self {
            started: Instant::now(),
            count: 0,
            limit,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.started) >= Duration::from_secs(1) {
            self.started = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

async fn handle_socket(
    socket: WebSocket,
    channel: String,
    app_state: AppState,
    _permit: OwnedSemaphorePermit,
) {
    let (mut sink, mut stream) = socket.split();
    let config = app_state.config.clone();
    let mut subscription = app_state.hub.join(&channel);
    let conn_id = subscription.conn_id;

    tracing::info!(channel = %channel, conn_id, "Peer connected");

    // The subscribed frame is the transport's ready signal
    let subscribed = RelayMsg::Subscribed(SubscribedMsg {
        protocol_version: PROTOCOL_VERSION,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        connection_id: conn_id,
        channel: channel.clone(),
    });
    let sent = match serde_json::to_string(&subscribed) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode subscribed frame");
            false
        }
    };

    if sent {
        let mut rate = RateWindow::new(config.max_messages_per_sec);
        let mut parse_errors = 0u32;
        let mut dropped = 0u64;

        loop {
            tokio::select! {
                // Peer -> Relay
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > config.max_frame_bytes {
                                dropped += 1;
                                tracing::debug!(conn_id, len = text.len(), "Dropping oversized frame");
                                continue;
                            }
                            if !rate.allow() {
                                dropped += 1;
                                tracing::debug!(conn_id, "Dropping frame over rate limit");
                                continue;
                            }
                            match serde_json::from_str::<PeerMsg>(&text) {
                                Ok(PeerMsg::Broadcast(envelope)) => {
                                    let relayed = RelayMsg::Broadcast(envelope);
                                    match serde_json::to_string(&relayed) {
                                        Ok(json) => {
                                            // No other members is not an error
                                            let _ = subscription.tx.send(Frame {
                                                sender: conn_id,
                                                text: Utf8Bytes::from(json),
                                            });
                                        }
                                        Err(e) => tracing::warn!(conn_id, error = %e, "Failed to encode frame"),
                                    }
                                }
                                Err(e) => {
                                    parse_errors += 1;
                                    tracing::debug!(conn_id, error = %e, "Unparseable frame");
                                    if parse_errors > config.max_parse_errors {
                                        tracing::warn!(conn_id, parse_errors, "Too many bad frames, closing");
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!(conn_id, error = %e, "Socket error");
                            break;
                        }
                        _ => {} // Ignore ping/pong/binary
                    }
                }

                // Relay -> Peer
                result = subscription.rx.recv() => {
                    match result {
                        Ok(frame) => {
                            if frame.sender == conn_id {
                                continue;
                            }
                            if sink.send(Message::Text(frame.text)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(conn_id, skipped = n, "Peer lagged");
                            // Continue - the game protocol tolerates loss
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        if dropped > 0 {
            tracing::info!(conn_id, dropped, "Frames dropped during session");
        }
    }

    // Cleanup on disconnect
    app_state.hub.leave(&subscription.channel);
    tracing::info!(channel = %channel, conn_id, "Peer disconnected");
}
