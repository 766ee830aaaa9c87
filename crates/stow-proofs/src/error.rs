//! Error types for proof scheduling.

use stow_core::Timestamp;
use thiserror::Error;

/// Result type alias for proof operations.
pub type Result<T> = std::result::Result<T, ProofError>;

/// Errors that can occur in proof operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    /// The id already has a schedule that has not ended.
    #[error("proof id already in use")]
    AlreadyInUse,

    /// Probability must be at least 1.
    #[error("proof probability must be non-zero")]
    InvalidProbability,

    /// No proof is required for this id in this period.
    #[error("proof was not required")]
    ProofNotRequired,

    /// The proof failed verification.
    #[error("invalid proof")]
    InvalidProof,

    /// A proof was already submitted for this period.
    #[error("proof already submitted")]
    AlreadySubmitted,

    /// The period has not ended yet.
    #[error("period has not ended yet (ends at {period_end})")]
    PeriodNotEnded {
        /// End of the period.
        period_end: Timestamp,
    },

    /// The window for marking the proof as missing has passed.
    #[error("validation timed out at {deadline}")]
    ValidationTimedOut {
        /// End of the validation window.
        deadline: Timestamp,
    },

    /// The proof was already marked as missing.
    #[error("proof already marked as missing")]
    AlreadyMarkedMissing,

    /// Configuration is invalid.
    #[error("invalid proof configuration: {0}")]
    InvalidConfig(String),

    /// Time arithmetic overflowed.
    #[error("time overflow")]
    Overflow,
}
