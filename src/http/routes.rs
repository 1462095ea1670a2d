use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::get_status))
        // Conversation control
        .route("/conversation/start", post(handlers::start_recording))
        .route("/conversation/stop", post(handlers::stop_recording))
        .route("/conversation/abort", post(handlers::abort_speaking))
        .route("/conversation/mode", put(handlers::set_mode))
        .route("/conversation/text", post(handlers::send_text))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
