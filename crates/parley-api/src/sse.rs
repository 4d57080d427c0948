//! Server-sent event encoding of turn events.
//!
//! Every event carries its kind both as the SSE `event:` field and as a
//! `type` member of the JSON `data:` payload, so clients that only read the
//! data lines still see the label.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_stream::{Stream, StreamExt};

use parley_chat::{ChatError, TurnEvent, TurnHandle};
use parley_core::types::SessionId;

/// Text shown to the user when a turn was stopped.
pub const STOPPED_MESSAGE: &str = "Response stopped by user";

/// Machine-readable code for a turn error.
pub fn error_code(error: &ChatError) -> &'static str {
    match error {
        ChatError::Disabled => "disabled",
        ChatError::EmptyMessage | ChatError::MessageTooLong(_) | ChatError::InvalidSessionId => {
            "invalid_input"
        }
        ChatError::SessionNotFound(_) => "session_not_found",
        ChatError::TurnInProgress(_) => "turn_in_progress",
        ChatError::GenerationFailure(_) => "generation_failed",
        ChatError::Timeout(_) => "timeout",
        ChatError::TransportDisconnect => "disconnected",
        ChatError::PersistenceFailure(_) => "persistence_failed",
    }
}

/// JSON payload of one turn event.
pub fn event_payload(session_id: &SessionId, event: &TurnEvent) -> Value {
    let timestamp = Utc::now().to_rfc3339();
    match event {
        TurnEvent::Content { fragment } => json!({
            "type": "content",
            "session_id": session_id,
            "chunk": fragment,
            "timestamp": timestamp,
        }),
        TurnEvent::Complete {
            message_id,
            full_response,
            language_detected,
            message_count,
        } => json!({
            "type": "complete",
            "session_id": session_id,
            "message_id": message_id,
            "full_response": full_response,
            "language_detected": language_detected,
            "message_count": message_count,
            "timestamp": timestamp,
        }),
        TurnEvent::Stopped {
            message_id,
            partial_response,
            full_response,
            language_detected,
            message_count,
        } => json!({
            "type": "stopped",
            "session_id": session_id,
            "message_id": message_id,
            "message": STOPPED_MESSAGE,
            "partial_response": partial_response,
            "full_response": full_response,
            "language_detected": language_detected,
            "message_count": message_count,
            "timestamp": timestamp,
        }),
        TurnEvent::Error { error } => json!({
            "type": "error",
            "session_id": session_id,
            "error": error_code(error),
            "message": error.to_string(),
            "timestamp": timestamp,
        }),
    }
}

/// Encode a turn event as an SSE frame.
pub fn to_sse_event(session_id: &SessionId, event: &TurnEvent) -> Event {
    Event::default()
        .event(event.kind())
        .data(event_payload(session_id, event).to_string())
}

/// Stream a running turn to the client.
///
/// When the client disconnects, axum drops the stream, which cancels the
/// turn; the engine then commits it as stopped.
pub fn turn_stream(
    handle: TurnHandle,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let session_id = handle.session_id().clone();
    let events = handle
        .into_events()
        .map(move |event| Ok(to_sse_event(&session_id, &event)));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Text a plain-text client sees for one turn event.
///
/// Fragments pass through as-is. A stop or failure appends a short notice;
/// completion adds nothing.
pub fn plain_text_chunk(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::Content { fragment } => Some(fragment.clone()),
        TurnEvent::Complete { .. } => None,
        TurnEvent::Stopped { .. } => Some(STOPPED_MESSAGE.to_string()),
        TurnEvent::Error { error } => Some(format!("An error occurred: {}", error)),
    }
}

/// Stream a running turn as a bare `text/plain` body.
///
/// Disconnects cancel the turn the same way as [`turn_stream`].
pub fn plain_text_stream(handle: TurnHandle) -> Response {
    let chunks = handle
        .into_events()
        .filter_map(|event| plain_text_chunk(&event))
        .map(Ok::<_, Infallible>);

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response()
}
