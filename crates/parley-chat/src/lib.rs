//! Conversational session engine for Parley.
//!
//! Owns the session store, runs chat turns against a generation backend
//! with cooperative cancellation, and forwards user reactions to the
//! persistence sink without blocking the chat flow.

pub mod cancel;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod openai;
pub mod session;
pub mod state;
pub mod translate;
pub mod turn;

pub use cancel::{TurnRegistry, TurnTicket};
pub use error::ChatError;
pub use feedback::{FeedbackSink, RecordSink};
pub use generator::{
    AnswerGenerator, FragmentStream, GenerationError, GenerationRequest, ScriptedGenerator,
};
pub use openai::{OpenAiGenerator, OpenAiTranslator};
pub use session::{Session, SessionStore, TurnPermit};
pub use state::TurnState;
pub use translate::{TranslationError, TranslationOutcome, TranslationService, Translator};
pub use turn::{TurnEvent, TurnEventStream, TurnHandle, TurnProcessor, TurnReply};
