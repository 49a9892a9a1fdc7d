//! termcast-relay: the session-routing relay (spec §4.1). Split into a
//! library so the integration tests can spin up the real `axum::Router`
//! against a bound port instead of re-parsing the binary's `main`.

pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod model;
pub mod reap;
pub mod state;
pub mod ws;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Builds the full application: the `/ws` upgrade route plus the REST
/// surface from §6, both backed by the same `AppState`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(http::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
