//! Error types for the ledger

use thiserror::Error;

use crate::types::{BlockHash, ChainBreak};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Consistency fault: {0}")]
    Consistency(#[from] ConsistencyFault),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Permission denied for {action}")]
    PermissionDenied { action: String },
}

impl LedgerError {
    /// Rejections a caller can act on without operator involvement
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(_)
                | LedgerError::Conflict(_)
                | LedgerError::PermissionDenied { .. }
        )
    }

    /// Failures that mean the chain itself cannot be trusted until investigated
    pub fn requires_operator(&self) -> bool {
        matches!(self, LedgerError::Integrity(_) | LedgerError::Consistency(_))
    }
}

/// Business-rule violations. Never committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid transaction: {reason}")]
    InvalidTransaction { reason: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Unknown product: {sku}")]
    UnknownProduct { sku: String },

    #[error("Duplicate SKU: {sku}")]
    DuplicateSku { sku: String },

    #[error("Insufficient stock for {sku} at {location}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        location: String,
        available: u64,
        requested: u64,
    },

    #[error("Source and destination are both {location}")]
    SameLocation { location: String },

    #[error("Cannot delete {sku}: {remaining} units still in stock")]
    StockRemaining { sku: String, remaining: u64 },

    #[error("Product {sku} is deleted")]
    ProductDeleted { sku: String },

    #[error("Genesis is only legal at index 0, found at {index}")]
    MisplacedGenesis { index: u64 },

    #[error("Quantity overflow for {sku}")]
    QuantityOverflow { sku: String },

    #[error("Inventory value overflow caused by {sku}")]
    ValueOverflow { sku: String },
}

/// Structural damage found by chain verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("Chain broken at index {index}: {failure:?}")]
    Broken { index: u64, failure: ChainBreak },

    #[error("Ledger holds no genesis block")]
    MissingGenesis,
}

/// An append lost the race for the tail and exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("Tail moved during append after {attempts} attempts (last observed {observed_index}:{observed_hash})")]
    TailContention {
        attempts: u32,
        observed_index: u64,
        observed_hash: BlockHash,
    },
}

/// A committed block failed the reducer on replay. Should never happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyFault {
    #[error("Replay of committed block {index} ({hash}) failed: {source}")]
    ReplayRejected {
        index: u64,
        hash: BlockHash,
        source: ValidationError,
    },

    #[error("Replayed state invalid after block {index}: {reason}")]
    InvalidReplayedState { index: u64, reason: String },

    #[error("Inventory value overflowed after block {index}")]
    ValueOverflow { index: u64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Tail moved: expected to extend {expected_index}, store tail is {actual_index}")]
    TailMoved {
        expected_index: u64,
        actual_index: u64,
        actual_hash: BlockHash,
    },

    #[error("Store is empty")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record at line {line}: {reason}")]
    CorruptRecord { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
