//! Sources of per-period randomness.

use std::fmt;

/// Supplies the random value a period's proof requirements are drawn from.
///
/// The value for a period must not be predictable before that period starts
/// and must never change afterwards.
pub trait RandomnessSource: Send + Sync + fmt::Debug {
    /// Returns the random value for `period`.
    fn randomness(&self, period: u64) -> [u8; 32];
}

/// Deterministic beacon that hashes a fixed seed with the period number.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HashBeacon {
    seed: [u8; 32],
}

impl HashBeacon {
    /// Creates a beacon from a seed.
    #[must_use]
    pub const fn new(seed: [u8; 32]) -> Self {
        Self { seed }
    }
}

impl Default for HashBeacon {
    fn default() -> Self {
        Self::new(*blake3::hash(b"stow/beacon/default").as_bytes())
    }
}

impl fmt::Debug for HashBeacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashBeacon").finish_non_exhaustive()
    }
}

impl RandomnessSource for HashBeacon {
    fn randomness(&self, period: u64) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/beacon/");
        hasher.update(&self.seed);
        hasher.update(&period.to_be_bytes());
        *hasher.finalize().as_bytes()
    }
}
