//! Error types for vault operations.

use stow_core::{Amount, Timestamp};
use stow_token::TokenError;
use thiserror::Error;

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur in vault operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// Moving tokens into or out of custody failed.
    #[error("token transfer failed: {0}")]
    TransferFailed(TokenError),

    /// Not enough undesignated, uncommitted balance.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount required for the operation.
        required: Amount,
        /// Amount currently available.
        available: Amount,
    },

    /// Funds are locked until the lock expires.
    #[error("funds are locked until {expiry}")]
    Locked {
        /// Lock expiry.
        expiry: Timestamp,
    },

    /// A lock is already set for this context.
    #[error("context is already locked")]
    AlreadyLocked,

    /// The expiry lies beyond the lock maximum.
    #[error("expiry {expiry} is past maximum {maximum}")]
    ExpiryPastMaximum {
        /// Requested expiry.
        expiry: Timestamp,
        /// Lock maximum.
        maximum: Timestamp,
    },

    /// The operation needs an active lock.
    #[error("an active lock is required")]
    LockRequired,

    /// A lock expiry may only move forward.
    #[error("invalid expiry: {requested} is before current expiry {current}")]
    InvalidExpiry {
        /// Current expiry.
        current: Timestamp,
        /// Requested expiry.
        requested: Timestamp,
    },

    /// Balance arithmetic overflowed.
    #[error("balance overflow")]
    Overflow,
}
