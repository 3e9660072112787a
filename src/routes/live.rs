//! Long-lived connections: the public SSE feed and player WebSocket sessions.

use std::convert::Infallible;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, sse::Event, sse::Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    services::{sse_service, websocket_service},
    state::SharedState,
};

/// Largest inbound player frame. A full damage batch fits comfortably.
const MAX_PLAYER_FRAME: usize = 16 * 1024;

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Public SSE stream: handshake, then boss.health, boss.damage_feed, boss.killed, boss.respawned, boss.finished, system.status", content_type = "text/event-stream", body = String))
)]
/// Stream boss events to spectators and game clients.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = sse_service::subscribe_public(&state);
    let preamble = sse_service::public_preamble(&state).await;
    info!(
        subscribers = state.public_events().subscriber_count(),
        replayed = preamble.len(),
        "public SSE client connected"
    );
    sse_service::to_sse_stream(receiver, preamble)
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "players",
    responses((status = 101, description = "Switching protocols to WebSocket; the first frame must be `identify`"))
)]
/// Upgrade to a player session.
pub async fn player_socket(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_PLAYER_FRAME)
        .max_frame_size(MAX_PLAYER_FRAME)
        .on_upgrade(move |socket| websocket_service::handle_socket(state, socket))
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/public", get(public_stream))
        .route("/ws", get(player_socket))
}
