//! Error taxonomy for the federation core.
//!
//! Per-participant failures (`Decryption`, `Timeout`, `MalformedUpdate`,
//! `StaleRound`, `Transport`) only shrink a round's participant set. The
//! structural ones (`EmptyInput`, `SchemaMismatch`, `NoUpdates`) and
//! `Cancelled` end the session.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FederationError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FederationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("participant not found: {0}")]
    NotFound(String),
    #[error("insufficient participants: {active} active < {required} required")]
    InsufficientParticipants { active: usize, required: usize },
    #[error("no updates received in round {round}")]
    NoUpdates { round: u64 },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("aggregation input is empty")]
    EmptyInput,
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("stale round: expected {expected}, got {got}")]
    StaleRound { expected: u64, got: u64 },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("session cancelled")]
    Cancelled,
    #[error("participant {org_id} timed out")]
    Timeout { org_id: String },
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("config error: {0}")]
    Config(String),
}

impl FederationError {
    /// True for errors that only drop a single participant from a round.
    pub fn is_participant_local(&self) -> bool {
        matches!(
            self,
            FederationError::Decryption(_)
                | FederationError::Timeout { .. }
                | FederationError::MalformedUpdate(_)
                | FederationError::StaleRound { .. }
                | FederationError::Transport(_)
        )
    }
}
