//! Error types for the conversational engine.

use parley_core::error::ParleyError;
use parley_core::types::SessionId;

use crate::generator::GenerationError;

/// Errors from the chat engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("chat is disabled")]
    Disabled,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("a turn is already in progress for session {0}")]
    TurnInProgress(SessionId),
    #[error("generation failed: {0}")]
    GenerationFailure(String),
    #[error("no response from the generation backend within {0} seconds")]
    Timeout(u64),
    #[error("client disconnected")]
    TransportDisconnect,
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),
}

impl ChatError {
    /// User-correctable input problems.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) | ChatError::InvalidSessionId
        )
    }
}

impl From<GenerationError> for ChatError {
    fn from(err: GenerationError) -> Self {
        ChatError::GenerationFailure(err.to_string())
    }
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::PersistenceFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::Disabled.to_string(), "chat is disabled");
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(1000).to_string(),
            "message exceeds maximum length of 1000 characters"
        );

        let id = SessionId::parse("abc-123").unwrap();
        assert_eq!(
            ChatError::SessionNotFound(id.clone()).to_string(),
            "session not found: abc-123"
        );
        assert_eq!(
            ChatError::TurnInProgress(id).to_string(),
            "a turn is already in progress for session abc-123"
        );
        assert_eq!(
            ChatError::Timeout(30).to_string(),
            "no response from the generation backend within 30 seconds"
        );
    }

    #[test]
    fn test_invalid_input_classification() {
        assert!(ChatError::EmptyMessage.is_invalid_input());
        assert!(ChatError::MessageTooLong(5).is_invalid_input());
        assert!(ChatError::InvalidSessionId.is_invalid_input());
        assert!(!ChatError::GenerationFailure("x".into()).is_invalid_input());
        assert!(!ChatError::SessionNotFound(SessionId::generate()).is_invalid_input());
    }

    #[test]
    fn test_from_generation_error() {
        let err: ChatError = GenerationError::Request("HTTP 500".to_string()).into();
        assert!(matches!(err, ChatError::GenerationFailure(_)));
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_from_parley_error() {
        let err: ChatError = ParleyError::Storage("disk full".to_string()).into();
        assert!(matches!(err, ChatError::PersistenceFailure(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
