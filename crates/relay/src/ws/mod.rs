//! WebSocket entry point. One `GET /ws` upgrade handler for all three
//! roles (spec §4.1 "Connection handshake") — it reads the query string,
//! rejects malformed handshakes, then hands the socket to the
//! role-specific connection loop.

mod control;
mod daemon;
mod producer;
mod viewer;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use tracing::warn;

use termcast_protocol::{ConnectQuery, ConnectionRole};

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

async fn handle_socket(socket: WebSocket, query: ConnectQuery, state: AppState) {
    // spec §4.1: "missing sessionId on a non-daemon connection => close".
    if query.role != ConnectionRole::Daemon && query.session_id.is_none() {
        warn!(role = ?query.role, "handshake missing sessionId, closing");
        return;
    }

    match query.role {
        ConnectionRole::Producer => producer::run(socket, query, state).await,
        ConnectionRole::Daemon => daemon::run(socket, state).await,
        ConnectionRole::Viewer => viewer::run(socket, query, state).await,
    }
}
