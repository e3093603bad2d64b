//! Error types for persuade-core

use thiserror::Error;

use crate::types::{ConversationId, OutcomeId};

/// Error type for strategy selection, attribution and ledger operations
#[derive(Debug, Error)]
pub enum PersuadeError {
    /// Caller supplied a value outside the accepted domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A conversion was already recorded for this conversation
    #[error("Duplicate outcome {outcome_id} for conversation {conversation_id}")]
    DuplicateOutcome {
        conversation_id: ConversationId,
        outcome_id: OutcomeId,
    },

    /// The durable ledger store could not be written
    #[error("Persistence unavailable after {attempts} attempt(s): {reason}")]
    PersistenceUnavailable { attempts: u32, reason: String },

    /// Conversation was never seen by the session tracker
    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An in-process lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl PersuadeError {
    /// Whether a storage write that failed with this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}

/// Result type alias for persuade operations
pub type Result<T> = std::result::Result<T, PersuadeError>;
