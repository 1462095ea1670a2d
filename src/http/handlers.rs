use super::state::AppState;
use crate::conversation::ConversationMode;
use crate::error::{LinkError, LinkResult};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: ConversationMode,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// 409 for commands the current state forbids, 503 while the session or
/// its media path is unavailable
fn status_for(error: &LinkError) -> StatusCode {
    match error {
        LinkError::InvalidState(_) => StatusCode::CONFLICT,
        LinkError::NoSession
        | LinkError::MediaNotReady
        | LinkError::Connection(_)
        | LinkError::Handshake(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn command_response(action: &str, result: LinkResult<()>) -> Response {
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandResponse {
                status: "ok".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("{} failed: {}", action, e);
            (
                status_for(&e),
                Json(ErrorResponse {
                    error: e.status_text(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.snapshot()))
}

/// POST /conversation/start
pub async fn start_recording(State(state): State<AppState>) -> Response {
    info!("HTTP: start listening");
    command_response("start", state.controller.start_recording().await)
}

/// POST /conversation/stop
pub async fn stop_recording(State(state): State<AppState>) -> Response {
    info!("HTTP: stop listening");
    command_response("stop", state.controller.stop_recording().await)
}

/// POST /conversation/abort
pub async fn abort_speaking(State(state): State<AppState>) -> Response {
    info!("HTTP: abort speaking");
    command_response("abort", state.controller.abort_speaking().await)
}

/// PUT /conversation/mode
pub async fn set_mode(State(state): State<AppState>, Json(req): Json<SetModeRequest>) -> Response {
    info!("HTTP: mode -> {}", req.mode);
    command_response("set mode", state.controller.set_mode(req.mode).await)
}

/// POST /conversation/text
pub async fn send_text(State(state): State<AppState>, Json(req): Json<SendTextRequest>) -> Response {
    command_response("send text", state.controller.send_text(req.text).await)
}
