//! Error types for the baccarat table engine
//!
//! Every fallible operation returns [`CasinoResult`]. Validation failures are
//! recoverable and leave state untouched; storage failures abort the operation
//! and rely on atomic batch commits to keep state consistent.

use crate::games::types::{AccountId, ChatId, RoundId, RoundStatus};
use std::fmt;

/// Root error type for all table operations
#[derive(Debug)]
pub enum CasinoError {
    /// User input rejected before any mutation
    Validation(ValidationError),

    /// Persistence layer failures
    Storage(StorageError),

    /// Configuration loading and validation errors
    Configuration(ConfigurationError),
}

/// Bet and command validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Bet amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("Invalid bet choice: '{0}' (expected PLAYER, BANKER or TIE)")]
    InvalidChoice(String),

    #[error("No open round in chat {0}")]
    NoOpenRound(ChatId),

    #[error("Round {round} in chat {chat} is not open ({status:?})")]
    RoundNotOpen {
        chat: ChatId,
        round: RoundId,
        status: RoundStatus,
    },

    #[error("Unknown round {round} in chat {chat}")]
    UnknownRound { chat: ChatId, round: RoundId },

    #[error("Account {0} has no points to stake")]
    EmptyBalance(AccountId),

    #[error("Round {round} in chat {chat} is still being settled")]
    SettlementInProgress { chat: ChatId, round: RoundId },
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

impl CasinoError {
    /// True for errors caused by user input rather than the system
    pub fn is_validation(&self) -> bool {
        matches!(self, CasinoError::Validation(_))
    }

    /// Borrow the validation error, if this is one
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            CasinoError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for CasinoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasinoError::Validation(e) => write!(f, "Validation error: {}", e),
            CasinoError::Storage(e) => write!(f, "Storage error: {}", e),
            CasinoError::Configuration(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for CasinoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CasinoError::Validation(e) => Some(e),
            CasinoError::Storage(e) => Some(e),
            CasinoError::Configuration(e) => Some(e),
        }
    }
}

impl From<ValidationError> for CasinoError {
    fn from(e: ValidationError) -> Self {
        CasinoError::Validation(e)
    }
}

impl From<StorageError> for CasinoError {
    fn from(e: StorageError) -> Self {
        CasinoError::Storage(e)
    }
}

impl From<ConfigurationError> for CasinoError {
    fn from(e: ConfigurationError) -> Self {
        CasinoError::Configuration(e)
    }
}

// External error conversions
impl From<rocksdb::Error> for CasinoError {
    fn from(e: rocksdb::Error) -> Self {
        CasinoError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for CasinoError {
    fn from(e: serde_json::Error) -> Self {
        CasinoError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<bincode::Error> for CasinoError {
    fn from(e: bincode::Error) -> Self {
        CasinoError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<std::io::Error> for CasinoError {
    fn from(e: std::io::Error) -> Self {
        CasinoError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type CasinoResult<T> = Result<T, CasinoError>;
