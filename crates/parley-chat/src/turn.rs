//! Turn processing: validate a message, stream the backend's answer, commit
//! the outcome to the session history.
//!
//! Each accepted turn runs on its own task. Fragments are relayed through a
//! bounded channel so a slow reader only stalls its own turn. The reader
//! side ([`TurnEventStream`]) cancels the turn when dropped, which is how a
//! client disconnect becomes an implicit stop.
//!
//! Exactly one terminal event (`complete`, `stopped` or `error`) ends every
//! stream. History is committed before the terminal event is sent, so a
//! client that reacts to `complete` by sending its next message never sees a
//! spurious conflict.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_core::clean_text;
use parley_core::config::ChatConfig;
use parley_core::language::classify;
use parley_core::types::{Language, SessionId, Turn, TurnStatus};

use crate::cancel::{TurnRegistry, TurnTicket};
use crate::error::ChatError;
use crate::generator::{AnswerGenerator, GenerationError, GenerationRequest};
use crate::session::{SessionStore, TurnPermit};
use crate::state::{validate_transition, TurnState};

// =============================================================================
// Events
// =============================================================================

/// One event on a turn's output stream.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A fragment of generated text, in production order.
    Content { fragment: String },
    /// The answer finished and was committed.
    Complete {
        message_id: Uuid,
        full_response: String,
        language_detected: Language,
        message_count: usize,
    },
    /// The turn was cancelled.
    Stopped {
        message_id: Uuid,
        /// Exactly the text relayed before the stop took effect.
        partial_response: String,
        /// The committed text: partial answer plus the stop marker.
        full_response: String,
        language_detected: Language,
        /// `None` when the session disappeared before the commit.
        message_count: Option<usize>,
    },
    /// The turn failed.
    Error { error: ChatError },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Content { .. })
    }

    /// Wire label of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::Content { .. } => "content",
            TurnEvent::Complete { .. } => "complete",
            TurnEvent::Stopped { .. } => "stopped",
            TurnEvent::Error { .. } => "error",
        }
    }
}

/// Ordered events of one turn.
///
/// Ends after the terminal event. Dropping the stream early cancels the turn.
pub struct TurnEventStream {
    rx: mpsc::Receiver<TurnEvent>,
    _guard: DropGuard,
    finished: bool,
}

impl TurnEventStream {
    fn new(rx: mpsc::Receiver<TurnEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            _guard: cancel.drop_guard(),
            finished: false,
        }
    }
}

impl Stream for TurnEventStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // The turn task went away without a verdict.
                self.finished = true;
                Poll::Ready(Some(TurnEvent::Error {
                    error: ChatError::GenerationFailure("turn ended without a result".to_string()),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for TurnEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEventStream")
            .field("finished", &self.finished)
            .finish()
    }
}

// =============================================================================
// Handle and reply
// =============================================================================

/// Buffered result of a turn, for non-streaming callers.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub message_id: Uuid,
    pub response: String,
    pub language_detected: Language,
    pub message_count: Option<usize>,
    pub status: TurnStatus,
}

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: SessionId,
    turn_id: Uuid,
    message_id: Uuid,
    language: Language,
    cancel: CancellationToken,
    events: TurnEventStream,
}

impl TurnHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    /// Id the assistant turn will carry once committed.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop. The stream then ends with a `stopped` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_events(self) -> TurnEventStream {
        self.events
    }

    /// Run the turn to its end and return the buffered answer.
    pub async fn collect(self) -> Result<TurnReply, ChatError> {
        let mut events = self.events;
        while let Some(event) = events.next().await {
            match event {
                TurnEvent::Content { .. } => {}
                TurnEvent::Complete {
                    message_id,
                    full_response,
                    language_detected,
                    message_count,
                } => {
                    return Ok(TurnReply {
                        message_id,
                        response: full_response,
                        language_detected,
                        message_count: Some(message_count),
                        status: TurnStatus::Complete,
                    })
                }
                TurnEvent::Stopped {
                    message_id,
                    full_response,
                    language_detected,
                    message_count,
                    ..
                } => {
                    return Ok(TurnReply {
                        message_id,
                        response: full_response,
                        language_detected,
                        message_count,
                        status: TurnStatus::Stopped,
                    })
                }
                TurnEvent::Error { error } => return Err(error),
            }
        }
        Err(ChatError::GenerationFailure(
            "turn ended without a result".to_string(),
        ))
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Runs chat turns against a generation backend.
pub struct TurnProcessor {
    store: Arc<SessionStore>,
    generator: Arc<dyn AnswerGenerator>,
    registry: TurnRegistry,
    config: ChatConfig,
    context_messages: usize,
}

impl TurnProcessor {
    pub fn new(
        store: Arc<SessionStore>,
        generator: Arc<dyn AnswerGenerator>,
        config: ChatConfig,
        context_messages: usize,
    ) -> Self {
        Self {
            store,
            generator,
            registry: TurnRegistry::new(),
            config,
            context_messages,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &TurnRegistry {
        &self.registry
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Trim, bound and sanitize a user message.
    ///
    /// Oversized input is rejected, never truncated. Length is measured in
    /// characters before escaping.
    pub fn validate(&self, message: &str) -> Result<String, ChatError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if trimmed.chars().count() > self.config.max_message_length {
            return Err(ChatError::MessageTooLong(self.config.max_message_length));
        }
        Ok(clean_text(trimmed))
    }

    /// Accept a message and start generating the answer.
    ///
    /// Errors returned here (invalid input, unknown session, turn already in
    /// progress) mean no turn was started and nothing was committed.
    pub fn start_turn(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> Result<TurnHandle, ChatError> {
        let message_id = Uuid::new_v4();
        let mut tracker = TurnTracker::new(session_id.clone(), message_id);

        if !self.config.enabled {
            tracker.advance(TurnState::Validating);
            tracker.advance(TurnState::Failed);
            return Err(ChatError::Disabled);
        }

        tracker.advance(TurnState::Validating);
        let prepared = self
            .validate(message)
            .and_then(|clean| {
                let permit = self.store.begin_turn(session_id)?;
                let context = self.store.context(session_id, self.context_messages)?;
                Ok((clean, permit, context))
            });
        let (clean, permit, context) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Turn rejected");
                tracker.advance(TurnState::Failed);
                return Err(e);
            }
        };

        let language = classify(message.trim());
        let ticket = self.registry.register(session_id.clone());
        let cancel = ticket.token();
        let turn_id = ticket.turn_id();
        tracker.advance(TurnState::AwaitingGeneration);

        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let run = TurnRun {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            tracker,
            session_id: session_id.clone(),
            message: clean,
            language,
            message_id,
            context,
            first_fragment_timeout: self.config.first_fragment_timeout(),
            stop_marker: self.config.stop_marker.clone(),
            tx,
            ticket,
            permit,
        };
        tokio::spawn(run.execute());

        Ok(TurnHandle {
            session_id: session_id.clone(),
            turn_id,
            message_id,
            language,
            cancel: cancel.clone(),
            events: TurnEventStream::new(rx, cancel),
        })
    }

    /// Signal the active turn of a session to stop. Returns whether one was running.
    pub fn stop_turn(&self, session_id: &SessionId) -> bool {
        let stopped = self.registry.cancel(session_id);
        if stopped {
            info!(session_id = %session_id, "Stop requested");
        }
        stopped
    }

    /// Delete a session, stopping its in-flight turn first.
    pub fn end_session(&self, session_id: &SessionId) -> bool {
        self.registry.cancel(session_id);
        self.store.delete(session_id)
    }
}

impl std::fmt::Debug for TurnProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnProcessor")
            .field("generator", &self.generator.name())
            .field("active_turns", &self.registry.active_count())
            .field("context_messages", &self.context_messages)
            .finish()
    }
}

// =============================================================================
// Turn execution
// =============================================================================

struct TurnTracker {
    session_id: SessionId,
    message_id: Uuid,
    state: TurnState,
}

impl TurnTracker {
    fn new(session_id: SessionId, message_id: Uuid) -> Self {
        Self {
            session_id,
            message_id,
            state: TurnState::Received,
        }
    }

    fn advance(&mut self, next: TurnState) {
        match validate_transition(self.state, next) {
            Ok(()) => {
                debug!(
                    session_id = %self.session_id,
                    message_id = %self.message_id,
                    from = %self.state,
                    to = %next,
                    "Turn state changed"
                );
                self.state = next;
            }
            Err(e) => error!(
                session_id = %self.session_id,
                message_id = %self.message_id,
                error = %e,
                "Rejected turn state change"
            ),
        }
    }
}

enum Outcome {
    Completed,
    Stopped,
    Failed(ChatError),
}

struct TurnRun {
    store: Arc<SessionStore>,
    generator: Arc<dyn AnswerGenerator>,
    tracker: TurnTracker,
    session_id: SessionId,
    message: String,
    language: Language,
    message_id: Uuid,
    context: Vec<Turn>,
    first_fragment_timeout: Duration,
    stop_marker: String,
    tx: mpsc::Sender<TurnEvent>,
    ticket: TurnTicket,
    permit: TurnPermit,
}

impl TurnRun {
    async fn execute(mut self) {
        let cancel = self.ticket.token();
        let mut relayed = String::new();
        let outcome = self.relay(&cancel, &mut relayed).await;
        let terminal = self.commit(outcome, relayed);

        let TurnRun {
            tx, ticket, permit, ..
        } = self;
        drop(ticket);
        drop(permit);
        // The reader may already be gone; that is a normal disconnect.
        let _ = tx.send(terminal).await;
    }

    /// Pull fragments from the backend and forward them until the stream
    /// ends, fails or is cancelled. `relayed` receives exactly the text that
    /// reached the channel.
    async fn relay(&mut self, cancel: &CancellationToken, relayed: &mut String) -> Outcome {
        let request = GenerationRequest {
            context: std::mem::take(&mut self.context),
            message: self.message.clone(),
            language: self.language,
        };
        let deadline = Instant::now() + self.first_fragment_timeout;
        let timeout_secs = self.first_fragment_timeout.as_secs();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Stopped,
            opened = tokio::time::timeout_at(deadline, self.generator.generate(request, cancel.clone())) => opened,
        };
        let mut stream = match opened {
            Err(_) => return Outcome::Failed(ChatError::Timeout(timeout_secs)),
            Ok(Err(GenerationError::Cancelled)) => return Outcome::Stopped,
            Ok(Err(e)) => return Outcome::Failed(e.into()),
            Ok(Ok(stream)) => stream,
        };

        let mut streaming = false;
        loop {
            let next = if streaming {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Stopped,
                    next = stream.next() => next,
                }
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Stopped,
                    next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                        Ok(next) => next,
                        Err(_) => return Outcome::Failed(ChatError::Timeout(timeout_secs)),
                    },
                }
            };

            let fragment = match next {
                None if cancel.is_cancelled() => return Outcome::Stopped,
                None => return Outcome::Completed,
                Some(Err(GenerationError::Cancelled)) => return Outcome::Stopped,
                Some(Err(e)) => return Outcome::Failed(e.into()),
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => fragment,
            };

            if !streaming {
                self.tracker.advance(TurnState::Streaming);
                streaming = true;
            }

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Stopped,
                sent = self.tx.send(TurnEvent::Content { fragment: fragment.clone() }) => sent,
            };
            if sent.is_err() {
                debug!(
                    session_id = %self.session_id,
                    error = %ChatError::TransportDisconnect,
                    "Reader gone, stopping turn"
                );
                cancel.cancel();
                return Outcome::Stopped;
            }
            relayed.push_str(&fragment);
        }
    }

    /// Record the outcome in history and build the terminal event.
    fn commit(&mut self, outcome: Outcome, relayed: String) -> TurnEvent {
        let user = Turn::user(self.message.clone(), self.language);

        match outcome {
            Outcome::Completed => {
                self.tracker.advance(TurnState::Completed);
                let assistant = Turn::assistant(
                    self.message_id,
                    relayed.clone(),
                    self.language,
                    TurnStatus::Complete,
                );
                match self.store.append_exchange(&self.session_id, user, assistant) {
                    Ok(message_count) => {
                        info!(
                            session_id = %self.session_id,
                            message_id = %self.message_id,
                            language = %self.language,
                            chars = relayed.chars().count(),
                            "Turn completed"
                        );
                        TurnEvent::Complete {
                            message_id: self.message_id,
                            full_response: relayed,
                            language_detected: self.language,
                            message_count,
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "Completed turn could not be committed");
                        TurnEvent::Error { error: e }
                    }
                }
            }
            Outcome::Stopped => {
                self.tracker.advance(TurnState::Stopped);
                let full_response = if relayed.is_empty() {
                    self.stop_marker.clone()
                } else {
                    format!("{} {}", relayed, self.stop_marker)
                };
                let assistant = Turn::assistant(
                    self.message_id,
                    full_response.clone(),
                    self.language,
                    TurnStatus::Stopped,
                );
                let message_count = match self.store.append_exchange(&self.session_id, user, assistant)
                {
                    Ok(count) => Some(count),
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "Stopped turn could not be committed");
                        None
                    }
                };
                info!(
                    session_id = %self.session_id,
                    message_id = %self.message_id,
                    chars = relayed.chars().count(),
                    "Turn stopped"
                );
                TurnEvent::Stopped {
                    message_id: self.message_id,
                    partial_response: relayed,
                    full_response,
                    language_detected: self.language,
                    message_count,
                }
            }
            Outcome::Failed(error) => {
                self.tracker.advance(TurnState::Failed);
                if !relayed.is_empty() {
                    let assistant = Turn::assistant(
                        self.message_id,
                        relayed,
                        self.language,
                        TurnStatus::Failed,
                    );
                    if let Err(e) = self.store.append_exchange(&self.session_id, user, assistant) {
                        warn!(session_id = %self.session_id, error = %e, "Partial answer could not be committed");
                    }
                }
                info!(session_id = %self.session_id, error = %error, "Turn failed");
                TurnEvent::Error { error }
            }
        }
    }
}
