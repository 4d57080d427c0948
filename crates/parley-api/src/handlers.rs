//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path/body parameters via axum extractors, calls
//! into the chat engine held by AppState, and returns JSON (or an SSE
//! stream for chat turns).

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_chat::ChatError;
use parley_core::types::{
    FeedbackKind, Language, SessionId, SessionStats, Turn, TurnStatus,
};

use crate::error::ApiError;
use crate::sse::{plain_text_stream, turn_stream};
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Stream the answer as server-sent events instead of one JSON reply.
    #[serde(default)]
    pub stream: bool,
}

/// Body of the legacy `POST /chat` endpoint. Always streams.
#[derive(Debug, Deserialize)]
pub struct LegacyChatRequest {
    /// Client-chosen session id; a new session is created when absent or unseen.
    pub session_id: Option<String>,
    pub message: String,
}

/// Query of the legacy `GET /chat` endpoint.
#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub bot_response: String,
    /// "good" or "bad".
    pub feedback: String,
    /// When the user reacted, as reported by the client (RFC 3339).
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    /// "english" or "roman_urdu". Defaults to English.
    pub target_language: Option<String>,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_name: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub session_id: Option<String>,
    pub name: String,
    pub contact: String,
    pub interest: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub active_turns: usize,
    pub backend: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: SessionId,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: SessionId,
    pub message_id: Uuid,
    pub response: String,
    pub language_detected: Language,
    pub message_count: Option<usize>,
    pub status: TurnStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub session_id: SessionId,
    /// False when no turn was running.
    pub stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionHistoryResponse {
    pub session_id: SessionId,
    pub messages: Vec<Turn>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfoResponse {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub turn_in_progress: bool,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub session_id: SessionId,
    /// False when the session was already gone.
    pub deleted: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement of a fire-and-forget write.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    /// "success" when the record was accepted for writing, "error" otherwise.
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub status: String,
    pub original_text: String,
    pub translated_text: String,
    pub target_language: Language,
    /// False when translation failed and the original text was returned.
    pub translated: bool,
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).ok_or_else(|| ApiError::from(ChatError::InvalidSessionId))
}

fn ack(result: Result<(), ChatError>, what: &str) -> Json<AckResponse> {
    match result {
        Ok(()) => Json(AckResponse {
            status: "success".to_string(),
            message: format!("{} stored successfully", what),
        }),
        Err(e) => Json(AckResponse {
            status: "error".to_string(),
            message: format!("Failed to store {}: {}", what.to_lowercase(), e),
        }),
    }
}

fn require_field(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", name)));
    }
    Ok(())
}

// =============================================================================
// Health and directory
// =============================================================================

/// GET /health and GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions().stats().active_sessions,
        active_turns: state.processor.registry().active_count(),
        backend: state.processor.generator_name().to_string(),
    })
}

/// GET /api/v1/ - endpoint directory.
pub async fn api_index() -> Json<Value> {
    Json(json!({
        "name": "Parley API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /api/v1/health",
            "create_session": "POST /api/v1/sessions/start",
            "chat": "POST /api/v1/sessions/{session_id}/chat",
            "stop": "POST /api/v1/sessions/{session_id}/stop",
            "history": "GET /api/v1/sessions/{session_id}/history",
            "info": "GET /api/v1/sessions/{session_id}/info",
            "delete_session": "DELETE /api/v1/sessions/{session_id}",
            "stats": "GET /api/v1/sessions/stats",
            "legacy_chat": "POST /chat",
            "legacy_chat_text": "GET /chat?prompt=",
            "feedback": "POST /feedback",
            "translate": "POST /translate",
            "events": "POST /events",
            "leads": "POST /leads",
        },
    }))
}

// =============================================================================
// Sessions
// =============================================================================

/// POST /api/v1/sessions/start
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<SessionCreateResponse>, ApiError> {
    let sessions = state.sessions();
    let session_id = sessions.create();
    let session = sessions.get(&session_id)?;
    Ok(Json(SessionCreateResponse {
        session_id,
        status: "created".to_string(),
        created_at: session.created_at,
    }))
}

/// GET /api/v1/sessions/{id}/history
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionHistoryResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let session = state.sessions().get(&session_id)?;
    Ok(Json(SessionHistoryResponse {
        message_count: session.message_count(),
        session_id,
        created_at: session.created_at,
        last_activity: session.last_activity_at,
        messages: session.history,
    }))
}

/// GET /api/v1/sessions/{id}/info
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfoResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let info = state.sessions().info(&session_id)?;
    Ok(Json(SessionInfoResponse {
        session_id: info.session_id,
        created_at: info.created_at,
        last_activity: info.last_activity,
        message_count: info.message_count,
        turn_in_progress: info.turn_in_progress,
        is_active: true,
    }))
}

/// DELETE /api/v1/sessions/{id} - idempotent.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let deleted = state.processor.end_session(&session_id);
    let message = if deleted {
        format!("Session {} deleted successfully", session_id)
    } else {
        format!("Session {} was already absent", session_id)
    };
    Ok(Json(DeleteResponse {
        session_id,
        deleted,
        message,
    }))
}

/// GET /api/v1/sessions/stats
pub async fn session_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.sessions().stats(),
        timestamp: Utc::now(),
    })
}

// =============================================================================
// Chat
// =============================================================================

/// POST /api/v1/sessions/{id}/chat
///
/// With `stream: true` the answer arrives as server-sent events; otherwise
/// the same turn runs to the end and is returned as one JSON object.
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let handle = state.processor.start_turn(&session_id, &req.message)?;
    debug!(session_id = %session_id, stream = req.stream, "Chat turn started");

    if req.stream {
        return Ok(turn_stream(handle).into_response());
    }

    let reply = handle.collect().await?;
    Ok(Json(ChatResponse {
        session_id,
        message_id: reply.message_id,
        response: reply.response,
        language_detected: reply.language_detected,
        message_count: reply.message_count,
        status: reply.status,
        timestamp: Utc::now(),
    })
    .into_response())
}

/// POST /chat - legacy streaming endpoint with implicit session creation.
pub async fn legacy_chat(
    State(state): State<AppState>,
    Json(req): Json<LegacyChatRequest>,
) -> Result<Response, ApiError> {
    let sessions = state.sessions();
    let session_id = match req.session_id.as_deref() {
        Some(raw) => {
            let requested = parse_session_id(raw)?;
            let (session_id, created) = sessions.get_or_create(&requested);
            if created {
                debug!(session_id = %session_id, "Legacy client session created");
            }
            session_id
        }
        None => sessions.create(),
    };

    let handle = state.processor.start_turn(&session_id, &req.message)?;
    Ok(turn_stream(handle).into_response())
}

/// GET /chat?prompt= - legacy plain-text stream in a throwaway session.
pub async fn legacy_chat_get(
    State(state): State<AppState>,
    Query(query): Query<PromptQuery>,
) -> Result<Response, ApiError> {
    let session_id = state.sessions().create();
    let handle = state.processor.start_turn(&session_id, &query.prompt)?;
    debug!(session_id = %session_id, "Plain-text chat turn started");
    Ok(plain_text_stream(handle))
}

/// POST /api/v1/sessions/{id}/stop - cancel the in-flight turn.
pub async fn stop_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let stopped = state.processor.stop_turn(&session_id);
    if !stopped {
        // Distinguish "nothing running" from "no such session".
        state.sessions().info(&session_id)?;
    }
    Ok(Json(StopResponse {
        session_id,
        stopped,
    }))
}

// =============================================================================
// Feedback, events, leads, translation
// =============================================================================

/// POST /feedback
///
/// The message id is not checked against session history; the response only
/// reports whether the write was accepted.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    require_field(&req.message_id, "message_id")?;
    let kind: FeedbackKind = req.feedback.parse().map_err(ApiError::BadRequest)?;

    let result = state.sink.record_feedback(
        &req.message_id,
        &req.session_id,
        &req.user_message,
        &req.bot_response,
        kind,
        req.timestamp,
    );
    if result.is_ok() {
        info!(message_id = %req.message_id, feedback = kind.as_str(), "Feedback recorded");
    }
    Ok(ack(result, "Feedback"))
}

/// POST /events - UI telemetry.
pub async fn record_event(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    require_field(&req.event_name, "event_name")?;
    let result = state
        .sink
        .record_event(&req.event_name, req.session_id.as_deref(), req.metadata);
    Ok(ack(result, "Event"))
}

/// POST /leads - contact details left by a user.
pub async fn record_lead(
    State(state): State<AppState>,
    Json(req): Json<LeadRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    require_field(&req.name, "name")?;
    require_field(&req.contact, "contact")?;
    let result = state.sink.record_lead(
        req.session_id.as_deref(),
        &req.name,
        &req.contact,
        req.interest.as_deref(),
        req.metadata,
    );
    Ok(ack(result, "Lead"))
}

/// POST /translate
///
/// Backend failures fall back to the original text with `translated: false`.
pub async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    require_field(&req.text, "text")?;
    let target: Language = match req.target_language.as_deref() {
        Some(raw) => raw.parse().map_err(ApiError::BadRequest)?,
        None => Language::English,
    };

    let outcome = state.translator.translate(&req.text, target).await;
    if let Err(e) = state.sink.record_translation(
        req.session_id.as_deref(),
        req.message_id.as_deref(),
        &req.text,
        &outcome.text,
        target,
        outcome.translated,
    ) {
        warn!(error = %e, "Translation record dropped");
    }

    Ok(Json(TranslateResponse {
        status: "success".to_string(),
        original_text: req.text,
        translated_text: outcome.text,
        target_language: target,
        translated: outcome.translated,
    }))
}
