//! Ringfire relay library.
//!
//! A channel-scoped WebSocket fan-out: every broadcast frame a peer sends is
//! forwarded to all other peers subscribed to the same channel. The relay
//! never inspects payloads beyond the envelope.

pub mod config;
pub mod hub;
pub mod ws;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the relay router for the given state.
pub fn app(state: ws::AppState) -> Router {
    Router::new()
        .route("/ws/{channel}", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
