//! HTTP API server for a voice UI
//!
//! This module provides a REST API for driving conversations:
//! - POST /sessions - Create a conversation
//! - POST /sessions/:id/{warmup,welcome,record/start,record/stop,play,stop,reset} - Control it
//! - GET /sessions/:id/state - Query state
//! - GET /sessions/:id/history - Get the conversation so far
//! - GET /sessions/:id/events - Server-sent event stream
//! - DELETE /sessions/:id - Destroy a conversation
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, OrchestratorFactory};
