//! HTTP API server for a local UI layer
//!
//! This module provides a REST API for driving the conversation:
//! - GET /health - Health check
//! - GET /status - Current conversation snapshot
//! - POST /conversation/start - Start listening
//! - POST /conversation/stop - Stop listening
//! - POST /conversation/abort - Interrupt the assistant
//! - PUT /conversation/mode - Switch manual/auto/realtime
//! - POST /conversation/text - Send a typed message

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
