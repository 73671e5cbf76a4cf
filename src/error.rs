//! Game error taxonomy
//!
//! Precondition and state errors are returned to the caller as structured
//! responses; they never terminate a match. Invalid input is logged and
//! dropped in the hot path. A fatal invariant breach terminates the match
//! that raised it and nothing else.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("match not found: {0}")]
    MatchNotFound(String),

    #[error("player not found: {0}")]
    PlayerNotFound(String),

    #[error("spectator not found: {0}")]
    SpectatorNotFound(String),

    #[error("already joined")]
    AlreadyJoined,

    #[error("match is full")]
    MatchFull,

    #[error("spectator capacity reached")]
    SpectatorsFull,

    #[error("match already finished")]
    MatchFinished,

    #[error("player is not queued")]
    NotInQueue,

    #[error("action on cooldown")]
    OnCooldown,

    #[error("insufficient {0}")]
    InsufficientResource(&'static str),

    #[error("target out of range")]
    OutOfRange,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation already pending")]
    Pending,

    #[error("fatal invariant breach: {0}")]
    Fatal(String),
}

impl GameError {
    /// Wire-level reason code for error replies
    pub fn code(&self) -> &'static str {
        match self {
            GameError::MatchNotFound(_) => "match_not_found",
            GameError::PlayerNotFound(_) => "player_not_found",
            GameError::SpectatorNotFound(_) => "spectator_not_found",
            GameError::AlreadyJoined => "already_joined",
            GameError::MatchFull => "game_full",
            GameError::SpectatorsFull => "spectators_full",
            GameError::MatchFinished => "match_finished",
            GameError::NotInQueue => "not_in_queue",
            GameError::OnCooldown => "on_cooldown",
            GameError::InsufficientResource(_) => "insufficient_resource",
            GameError::OutOfRange => "out_of_range",
            GameError::InvalidInput(_) => "invalid_input",
            GameError::Pending => "operation_pending",
            GameError::Fatal(_) => "internal_error",
        }
    }

    /// Transient errors may be retried by the caller (bounded)
    pub fn is_transient(&self) -> bool {
        matches!(self, GameError::Pending)
    }
}

pub type GameResult<T> = Result<T, GameError>;
