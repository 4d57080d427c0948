//! Per-turn state machine with validated transitions.
//!
//! Received -> Validating -> AwaitingGeneration -> Streaming -> Completed/Stopped/Failed
//! AwaitingGeneration may also end directly when the backend produces nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Validating,
    AwaitingGeneration,
    Streaming,
    Completed,
    Stopped,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Stopped | TurnState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Received => "received",
            TurnState::Validating => "validating",
            TurnState::AwaitingGeneration => "awaiting_generation",
            TurnState::Streaming => "streaming",
            TurnState::Completed => "completed",
            TurnState::Stopped => "stopped",
            TurnState::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid turn transition: {0} -> {1}")]
pub struct InvalidTransition(pub TurnState, pub TurnState);

/// Validate that a turn state transition is allowed.
///
/// Valid transitions:
/// - Received -> Validating
/// - Validating -> AwaitingGeneration
/// - Validating -> Failed
/// - AwaitingGeneration -> Streaming
/// - AwaitingGeneration -> Completed (empty answer)
/// - AwaitingGeneration -> Stopped
/// - AwaitingGeneration -> Failed (backend error or first-fragment timeout)
/// - Streaming -> Completed
/// - Streaming -> Stopped
/// - Streaming -> Failed
pub fn validate_transition(from: TurnState, to: TurnState) -> Result<(), InvalidTransition> {
    let valid = matches!(
        (from, to),
        (TurnState::Received, TurnState::Validating)
            | (TurnState::Validating, TurnState::AwaitingGeneration)
            | (TurnState::Validating, TurnState::Failed)
            | (TurnState::AwaitingGeneration, TurnState::Streaming)
            | (TurnState::AwaitingGeneration, TurnState::Completed)
            | (TurnState::AwaitingGeneration, TurnState::Stopped)
            | (TurnState::AwaitingGeneration, TurnState::Failed)
            | (TurnState::Streaming, TurnState::Completed)
            | (TurnState::Streaming, TurnState::Stopped)
            | (TurnState::Streaming, TurnState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(InvalidTransition(from, to))
    }
}
