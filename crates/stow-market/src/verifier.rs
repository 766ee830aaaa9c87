//! Storage proof verification.

use std::fmt;

use stow_core::SlotId;
use stow_proofs::Challenge;

/// Checks a host's storage proof against a challenge.
pub trait ProofVerifier: fmt::Debug {
    /// Returns true if `proof` shows that `slot` is stored for `challenge`.
    fn verify(&self, slot: &SlotId, challenge: &Challenge, proof: &[u8]) -> bool;
}

/// Accepts any non-empty proof.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NonEmptyProof;

impl ProofVerifier for NonEmptyProof {
    fn verify(&self, _slot: &SlotId, _challenge: &Challenge, proof: &[u8]) -> bool {
        !proof.is_empty()
    }
}
