use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wall-clock timestamp used throughout the system.
pub type Timestamp = DateTime<Utc>;

/// Longest client-supplied session id accepted.
pub const MAX_SESSION_ID_LEN: usize = 128;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque session identifier.
///
/// Server-created ids are UUID v4 strings. Clients of the legacy chat
/// endpoint may bring their own id, so any short token of ASCII
/// alphanumerics, `-` and `_` is accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a client-supplied id.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_SESSION_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// How an assistant turn ended. User turns are always `Complete`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The backend finished naturally.
    #[default]
    Complete,
    /// Cancelled mid-stream; content holds the partial answer plus a stop marker.
    Stopped,
    /// The backend failed after producing some output.
    Failed,
}

/// The two supported conversation languages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    /// Urdu written with Latin letters.
    RomanUrdu,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::RomanUrdu => "roman_urdu",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "roman_urdu" | "roman-urdu" | "urdu" | "ur" => Ok(Language::RomanUrdu),
            other => Err(format!(
                "unknown language '{}'. Must be one of: english, roman_urdu",
                other
            )),
        }
    }
}

/// User reaction to an assistant message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Good,
    Bad,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Good => "good",
            FeedbackKind::Bad => "bad",
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" | "up" | "thumbs_up" => Ok(FeedbackKind::Good),
            "bad" | "down" | "thumbs_down" => Ok(FeedbackKind::Bad),
            other => Err(format!(
                "unknown feedback '{}'. Must be one of: good, bad",
                other
            )),
        }
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// One entry in a session's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Correlation id for feedback and translation requests.
    pub message_id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_detected: Option<Language>,
    #[serde(default)]
    pub status: TurnStatus,
}

impl Turn {
    /// Build a user turn stamped with the current time.
    pub fn user(content: impl Into<String>, language: Language) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            language_detected: Some(language),
            status: TurnStatus::Complete,
        }
    }

    /// Build an assistant turn stamped with the current time.
    pub fn assistant(
        message_id: Uuid,
        content: impl Into<String>,
        language: Language,
        status: TurnStatus,
    ) -> Self {
        Self {
            message_id,
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            language_detected: Some(language),
            status,
        }
    }
}

/// Read-only view of one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub message_count: usize,
    /// True while a turn is streaming on this session.
    pub turn_in_progress: bool,
}

/// Aggregate snapshot across all live sessions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_messages: usize,
    pub oldest_session: Option<Timestamp>,
}

// =============================================================================
// Recorded events
// =============================================================================

/// Thumbs up/down on a generated message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Message the feedback refers to. Not required to exist in any session.
    pub message_id: String,
    pub session_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub kind: FeedbackKind,
    pub timestamp: Timestamp,
}

/// Free-form UI telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    pub session_id: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: Timestamp,
}

/// A translation the user asked for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub original_text: String,
    pub translated_text: String,
    pub target_language: Language,
    /// False when the backend failed and the original text was returned.
    pub translated: bool,
    pub timestamp: Timestamp,
}

/// Contact details left by a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub session_id: Option<String>,
    pub name: String,
    pub contact: String,
    pub interest: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: Timestamp,
}

/// Anything written to the persistence sink. Records are write-once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Feedback(FeedbackRecord),
    Event(EventRecord),
    Translation(TranslationRecord),
    Lead(LeadRecord),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Feedback(_) => "feedback",
            Record::Event(_) => "event",
            Record::Translation(_) => "translation",
            Record::Lead(_) => "lead",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Record::Feedback(r) => Some(r.session_id.as_str()),
            Record::Event(r) => r.session_id.as_deref(),
            Record::Translation(r) => r.session_id.as_deref(),
            Record::Lead(r) => r.session_id.as_deref(),
        }
    }
}
