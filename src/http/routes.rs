use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", delete(handlers::delete_session))
        // Conversation control
        .route("/sessions/:session_id/warmup", post(handlers::warmup))
        .route("/sessions/:session_id/welcome", post(handlers::play_welcome))
        .route(
            "/sessions/:session_id/record/start",
            post(handlers::start_recording),
        )
        .route(
            "/sessions/:session_id/record/stop",
            post(handlers::stop_recording),
        )
        .route("/sessions/:session_id/play", post(handlers::play_audio))
        .route("/sessions/:session_id/stop", post(handlers::stop))
        .route("/sessions/:session_id/reset", post(handlers::reset))
        // Session queries
        .route("/sessions/:session_id/state", get(handlers::get_state))
        .route("/sessions/:session_id/history", get(handlers::get_history))
        .route("/sessions/:session_id/events", get(handlers::events))
        // Browser UIs call from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
