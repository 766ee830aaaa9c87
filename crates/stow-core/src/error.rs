//! Error types for stow-core.

use thiserror::Error;

/// Errors raised while parsing or constructing core primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Invalid amount (overflow or malformed input).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid address encoding.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid 32-byte identifier encoding.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
