//! REST surface (spec §6 "HTTP surface (relay)"). Backed by the same
//! `SessionDirectory` the WebSocket handlers mutate — one broker object
//! reached by both surfaces.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use termcast_protocol::{CommandId, SessionId, SessionSummary};

use crate::directory::derive_user_id;
use crate::error::RelayError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:session_id", get(get_session))
        .route("/api/user/sessions", post(user_sessions))
        .route("/api/daemon/command", post(daemon_command))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", timestamp: now_ms() })
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.directory.list_summaries().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    match state.directory.summarize(&SessionId::from(session_id)).await {
        Some(summary) => Json(summary).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "Session not found"}))).into_response(),
    }
}

#[derive(Deserialize)]
struct UserSessionsRequest {
    user_secret: String,
}

#[derive(Serialize)]
struct UserSessionsResponse {
    user_id: String,
    sessions: Vec<SessionSummary>,
}

async fn user_sessions(
    State(state): State<AppState>,
    Json(body): Json<UserSessionsRequest>,
) -> Json<UserSessionsResponse> {
    let user_id = derive_user_id(&body.user_secret);
    let owned = state.directory.sessions_for_user(&user_id).await;
    let mut sessions = Vec::with_capacity(owned.len());
    for (session_id, _) in &owned {
        if let Some(summary) = state.directory.summarize(session_id).await {
            sessions.push(summary);
        }
    }
    Json(UserSessionsResponse { user_id: user_id.to_string(), sessions })
}

#[derive(Deserialize)]
struct DaemonCommandHttpRequest {
    command: String,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

async fn daemon_command(
    State(state): State<AppState>,
    Json(body): Json<DaemonCommandHttpRequest>,
) -> axum::response::Response {
    let command_id = CommandId::from(Uuid::new_v4().to_string());
    match state
        .directory
        .dispatch_daemon_command(body.command, body.params, command_id)
        .await
    {
        Ok(response) if response.success => {
            Json(json!({"success": true, "data": response.data})).into_response()
        }
        Ok(response) => Json(json!({
            "error": response.error.unwrap_or_else(|| "daemon reported failure".into())
        }))
        .into_response(),
        Err(RelayError::NoDaemonConnected) => {
            Json(json!({"error": "No CLI daemon connected"})).into_response()
        }
        Err(RelayError::CommandTimeout) => {
            Json(json!({"error": "Command timeout"})).into_response()
        }
        Err(err) => Json(json!({"error": err.to_string()})).into_response(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_millis() as u64
}
