//! Error taxonomy for ledger operations.
//!
//! Every domain failure is caller-recoverable: the caller surfaces the message
//! and lets a human correct the input. Only [`LedgerError::Store`] wraps a
//! failure of the persistence collaborator, and retrying it is that
//! collaborator's business.

use crate::ledger_store::LedgerStoreError;
use crate::stock::Counter;
use crate::types::Role;
use thiserror::Error;

/// Result alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors produced by the ledger core and the services built on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or policy-violating input (non-positive quantity, missing
    /// notes or reason code, wrong lifecycle state for the movement category).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The movement would drive a counter below zero.
    #[error("Insufficient stock: {counter} is {available}, movement needs {requested}")]
    InsufficientStock {
        /// Counter that would go negative
        counter: Counter,
        /// Quantity the movement needs from that counter
        requested: u64,
        /// Current value of the counter
        available: u64,
    },

    /// An allocation already exists for this (item, reference) key.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A return or writeoff exceeds what is outstanding on the allocation.
    #[error("Over-return: requested {requested}, outstanding {outstanding}")]
    OverReturn {
        /// Quantity of the movement
        requested: u64,
        /// Outstanding quantity on the allocation
        outstanding: u64,
    },

    /// The actor's role is insufficient for the action.
    #[error("Not authorized to {action}: requires {required}, actor is {actual}")]
    Authorization {
        /// Action that was attempted
        action: String,
        /// Minimum role required (or `nobody` when the action is never allowed)
        required: String,
        /// Role of the actor (or `unknown`)
        actual: String,
    },

    /// Illegal lifecycle or workflow transition.
    #[error("Invalid state transition: {0}")]
    State(String),

    /// Referenced item, allocation or audit session does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Replaying the movement history does not reproduce the stored counters.
    #[error("Replay mismatch for item {item}: stored {stored}, replayed {replayed}")]
    ReplayMismatch {
        /// Item whose projection drifted
        item: String,
        /// Stored counters (debug form)
        stored: String,
        /// Counters obtained by replay (debug form)
        replayed: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

impl LedgerError {
    /// Shorthand for [`LedgerError::Validation`]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`LedgerError::State`]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Shorthand for [`LedgerError::Conflict`]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Shorthand for [`LedgerError::NotFound`]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Authorization failure for an actor with a known (or unknown) role
    pub fn unauthorized(action: impl Into<String>, required: Option<Role>, actual: Option<Role>) -> Self {
        Self::Authorization {
            action: action.into(),
            required: required.map_or_else(|| "nobody".to_string(), |r| r.to_string()),
            actual: actual.map_or_else(|| "unknown".to_string(), |r| r.to_string()),
        }
    }

    /// Stable label used for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Conflict(_) => "conflict",
            Self::OverReturn { .. } => "over_return",
            Self::Authorization { .. } => "authorization",
            Self::State(_) => "state",
            Self::NotFound(_) => "not_found",
            Self::ReplayMismatch { .. } => "replay_mismatch",
            Self::Store(_) => "store",
        }
    }

    /// Whether a human can fix the input and try again
    #[must_use]
    pub const fn is_caller_recoverable(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::ReplayMismatch { .. })
    }
}
