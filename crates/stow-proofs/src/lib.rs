//! # stow-proofs
//!
//! Decides, per registered identifier and per fixed-length period, whether a
//! storage proof is required, and records submitted and missed proofs.
//!
//! Time is cut into periods of [`ProofConfig::period`] seconds. For every
//! `(id, period)` pair the requirement is a pure function of the randomness
//! for that period and the id, so it is stable for the whole period and can
//! be re-evaluated after the period has ended when a watchdog marks a proof
//! as missing.
//!
//! ```rust
//! use stow_core::ProofId;
//! use stow_proofs::{ProofConfig, Proofs};
//!
//! let mut proofs = Proofs::new(ProofConfig::default());
//! let id = ProofId::new([1u8; 32]);
//! proofs.expect_proofs(id, 4, 86_400, 1_000_000).unwrap();
//!
//! // Never required in the first period.
//! assert!(!proofs.is_proof_required(&id, 1_000_000));
//! assert_eq!(proofs.missed(&id), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod proofs;
pub mod randomness;

pub use config::ProofConfig;
pub use error::{ProofError, Result};
pub use proofs::{Challenge, Period, Proofs};
pub use randomness::{HashBeacon, RandomnessSource};
