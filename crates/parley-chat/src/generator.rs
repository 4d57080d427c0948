//! Answer-generation backend seam.
//!
//! A backend turns the conversation context and the new user message into a
//! lazy, finite stream of text fragments. Errors while opening the stream
//! are returned directly; errors after that arrive as `Err` items. Backends
//! must stop producing fragments promptly once the cancellation token fires.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use parley_core::types::{Language, Turn};

/// Lazy sequence of answer fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Fragment size used when a complete answer is replayed as a stream.
pub const DEFAULT_FRAGMENT_CHARS: usize = 10;

/// Errors reported by a generation backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("malformed backend response: {0}")]
    Protocol(String),
    #[error("generation cancelled")]
    Cancelled,
}

/// Everything a backend needs to answer one turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Prior turns, oldest first.
    pub context: Vec<Turn>,
    /// The new user message (already sanitized).
    pub message: String,
    /// Detected language of the new message.
    pub language: Language,
}

/// Produces answer fragments for a chat turn.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &str;

    /// Start generating an answer.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GenerationError>;
}

/// Split text into fragments of at most `size` characters.
pub fn split_fragments(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

// =============================================================================
// ScriptedGenerator
// =============================================================================

/// Deterministic in-process backend.
///
/// Without fixed fragments it acknowledges the question in the user's
/// language. Delays and failures can be injected to exercise streaming,
/// timeout and cancellation paths.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    fragments: Option<Vec<String>>,
    fragment_chars: Option<usize>,
    delay: Duration,
    initial_delay: Duration,
    fail_after: Option<(usize, String)>,
    fail_on_start: Option<String>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with these fragments.
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = Some(fragments.into_iter().map(Into::into).collect());
        self
    }

    /// Fragment size for generated answers.
    pub fn with_fragment_chars(mut self, chars: usize) -> Self {
        self.fragment_chars = Some(chars);
        self
    }

    /// Pause between fragments.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pause before the first fragment.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Yield an error instead of fragment number `index` (zero-based).
    pub fn failing_after(mut self, index: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((index, message.into()));
        self
    }

    /// Refuse to open a stream at all.
    pub fn failing_on_start(mut self, message: impl Into<String>) -> Self {
        self.fail_on_start = Some(message.into());
        self
    }

    fn answer_for(&self, request: &GenerationRequest) -> Vec<String> {
        if let Some(ref fragments) = self.fragments {
            return fragments.clone();
        }
        let turn_number = request.context.len() / 2 + 1;
        let text = match request.language {
            Language::English => format!(
                "Thanks for your question: \"{}\". This is message {} in our conversation. \
                 Connect a generation backend for full answers.",
                request.message, turn_number
            ),
            Language::RomanUrdu => format!(
                "Shukriya! Aap ne poocha: \"{}\". Yeh hamari guftagu ka paigham number {} hai. \
                 Mukammal jawab ke liye generation backend connect karein.",
                request.message, turn_number
            ),
        };
        split_fragments(&text, self.fragment_chars.unwrap_or(DEFAULT_FRAGMENT_CHARS))
    }
}

struct Script {
    fragments: Vec<String>,
    next: usize,
    delay: Duration,
    initial_delay: Duration,
    fail_after: Option<(usize, String)>,
    cancel: CancellationToken,
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GenerationError> {
        if let Some(ref message) = self.fail_on_start {
            return Err(GenerationError::Unavailable(message.clone()));
        }

        let script = Script {
            fragments: self.answer_for(&request),
            next: 0,
            delay: self.delay,
            initial_delay: self.initial_delay,
            fail_after: self.fail_after.clone(),
            cancel,
        };

        let stream = futures::stream::unfold(script, |mut s| async move {
            let pause = if s.next == 0 {
                s.initial_delay
            } else {
                s.delay
            };
            if !pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = s.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            if s.cancel.is_cancelled() {
                return None;
            }
            if let Some((index, message)) = s.fail_after.clone() {
                if index == s.next {
                    s.fail_after = None;
                    s.next = s.fragments.len();
                    return Some((Err(GenerationError::Request(message)), s));
                }
            }
            let fragment = s.fragments.get(s.next)?.clone();
            s.next += 1;
            Some((Ok(fragment), s))
        });

        Ok(Box::pin(stream))
    }
}
