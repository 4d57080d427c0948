//! Application state shared across all route handlers.
//!
//! AppState holds the chat engine and the record sink. It is passed to
//! handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use parley_chat::{FeedbackSink, SessionStore, TranslationService, TurnProcessor};
use parley_core::config::ParleyConfig;

/// Shared application state.
///
/// All fields use `Arc` (or are cheap handles) for cloning across handler
/// tasks. The engine types are internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, read-only after startup.
    pub config: Arc<ParleyConfig>,
    /// Turn processor; owns the session store and the cancellation registry.
    pub processor: Arc<TurnProcessor>,
    /// Fire-and-forget feedback/event recorder.
    pub sink: FeedbackSink,
    /// Translation front end with fallback.
    pub translator: TranslationService,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ParleyConfig,
        processor: TurnProcessor,
        sink: FeedbackSink,
        translator: TranslationService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
            sink,
            translator,
            start_time: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.processor.store()
    }
}
