use super::state::AppState;
use crate::audio::PlatformProfile;
use crate::pipeline::audio_ref_from_parts;
use crate::session::{SessionIdentity, SessionState, VoiceOrchestrator};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Optional device ID (if not provided, generate UUID)
    pub device_id: Option<String>,

    /// Explicit platform; detected from the User-Agent header otherwise
    pub platform: Option<PlatformProfile>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub device_id: String,
    pub platform: PlatformProfile,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub session_id: String,
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub audio_url: Option<String>,
    /// Base64 audio, optionally as a data URL
    pub audio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Include high-rate frequency data
    #[serde(default)]
    pub frequency: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", session_id),
        }),
    )
        .into_response()
}

fn state_response(orchestrator: &VoiceOrchestrator) -> Response {
    (
        StatusCode::OK,
        Json(StateResponse {
            session_id: orchestrator.identity().session_id.clone(),
            state: orchestrator.state(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a conversation
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateSessionRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let device_id = req
        .device_id
        .unwrap_or_else(|| format!("device-{}", uuid::Uuid::new_v4()));
    let platform = req.platform.unwrap_or_else(|| {
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(PlatformProfile::from_user_agent)
            .unwrap_or_default()
    });

    let identity = SessionIdentity::new(device_id.clone(), state.agent_identity.clone());
    let session_id = identity.session_id.clone();

    let orchestrator = match (state.factory)(identity, platform) {
        Ok(o) => o,
        Err(e) => {
            error!("Failed to create session: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to create session: {}", e),
                }),
            )
                .into_response();
        }
    };

    let current = orchestrator.state();
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), orchestrator);

    info!("Session {} created for {} ({:?})", session_id, device_id, platform);

    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            device_id,
            platform,
            state: current,
        }),
    )
        .into_response()
}

/// POST /sessions/:session_id/warmup
pub async fn warmup(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.warmup().await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/welcome
pub async fn play_welcome(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.play_welcome().await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/record/start
pub async fn start_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.start_recording().await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/record/stop
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.stop_recording().await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/play
/// Play externally obtained audio (`audioUrl` or base64 `audio`)
pub async fn play_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<PlayRequest>,
) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    let Some(audio) = audio_ref_from_parts(req.audio_url, req.audio) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Either audioUrl or audio is required".to_string(),
            }),
        )
            .into_response();
    };
    orchestrator.play_audio(audio).await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/stop
pub async fn stop(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.stop().await;
    state_response(&orchestrator)
}

/// POST /sessions/:session_id/reset
pub async fn reset(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };
    orchestrator.reset().await;
    state_response(&orchestrator)
}

/// GET /sessions/:session_id/state
pub async fn get_state(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.get(&session_id).await {
        Some(orchestrator) => (StatusCode::OK, Json(orchestrator.snapshot().await)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.get(&session_id).await {
        Some(orchestrator) => (StatusCode::OK, Json(orchestrator.history().await)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/events
/// Server-sent event stream of orchestrator events
pub async fn events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(orchestrator) = state.get(&session_id).await else {
        return not_found(&session_id);
    };

    let receiver = orchestrator.subscribe();
    let include_frequency = query.frequency;

    let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_frequency() && !include_frequency {
                        continue;
                    }
                    match Event::default().event(event.name()).json_data(&event) {
                        Ok(sse) => return Some((Ok::<_, Infallible>(sse), receiver)),
                        Err(e) => warn!("Failed to encode event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// DELETE /sessions/:session_id
/// Destroy a conversation and release its audio resources
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let orchestrator = state.sessions.write().await.remove(&session_id);

    match orchestrator {
        Some(orchestrator) => {
            orchestrator.destroy().await;
            info!("Session {} destroyed", session_id);
            state_response(&orchestrator)
        }
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
