//! Error types for stow-market.

use stow_core::Amount;
use stow_proofs::ProofError;
use stow_token::TokenError;
use stow_vault::VaultError;
use thiserror::Error;

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Errors that can occur in marketplace operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// The request's client is not the caller, or the caller is not the
    /// request's client.
    #[error("invalid client address")]
    InvalidClientAddress,

    /// The ask is malformed.
    #[error("invalid ask: {0}")]
    InvalidAsk(String),

    /// A request with the same id exists.
    #[error("request already exists")]
    RequestAlreadyExists,

    /// No request with this id.
    #[error("unknown request")]
    UnknownRequest,

    /// The request is no longer (or not yet) accepting proofs.
    #[error("request not accepting proofs")]
    RequestNotAcceptingProofs,

    /// Slot index out of range.
    #[error("invalid slot")]
    InvalidSlot,

    /// The slot has a host already.
    #[error("slot already filled")]
    SlotAlreadyFilled,

    /// The host's free collateral does not cover the ask.
    #[error("insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral {
        /// Collateral required by the ask.
        required: Amount,
        /// Free collateral of the host.
        available: Amount,
    },

    /// The storage proof failed verification.
    #[error("invalid proof")]
    InvalidProof,

    /// The slot is not filled.
    #[error("slot empty")]
    SlotEmpty,

    /// The slot's request is no longer accepting proofs.
    #[error("slot not accepting proofs")]
    SlotNotAcceptingProofs,

    /// Only the slot's host may do this.
    #[error("caller is not the slot host")]
    InvalidSlotHost,

    /// The recipient is an account the marketplace holds escrow or
    /// collateral in.
    #[error("invalid recipient: marketplace account")]
    InvalidRecipient,

    /// The request has not ended yet.
    #[error("contract not ended")]
    ContractNotEnded,

    /// The slot was already paid out.
    #[error("already paid")]
    AlreadyPaid,

    /// The request has not expired yet.
    #[error("request not yet timed out")]
    RequestNotYetTimedOut,

    /// The request is in the wrong state for this operation.
    #[error("invalid state")]
    InvalidState,

    /// Pulling tokens from the caller failed.
    #[error("insufficient allowance: {0}")]
    InsufficientAllowance(TokenError),

    /// Vault operation failed.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// Proof operation failed.
    #[error("proof error: {0}")]
    Proofs(#[from] ProofError),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Arithmetic overflowed.
    #[error("arithmetic overflow")]
    Overflow,
}
