//! # stow-market
//!
//! The storage marketplace.
//!
//! Clients post [`StorageRequest`]s split into slots and escrow the price in
//! the vault. Hosts post collateral and fill slots; each filled slot gets a
//! proof schedule. Hosts are paid per second of storage when the request ends
//! and lose collateral for missed proofs.
//!
//! This crate provides:
//!
//! - [`Marketplace`]: the request and slot state machine
//! - [`Ledger`]: a sequential executor that samples time once per
//!   transaction and rolls failed transactions back
//! - Pricing ([`StorageRequest::price`], [`Ask::payout_for_duration`])
//! - [`MarketEvent`] notifications
//! - The [`ProofVerifier`] seam for checking storage proofs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod marketplace;
pub mod request;
pub mod state;
pub mod verifier;

pub use config::{CollateralConfig, MarketplaceConfig};
pub use error::{MarketError, Result};
pub use events::MarketEvent;
pub use ledger::Ledger;
pub use marketplace::{Marketplace, SlotInfo};
pub use request::{Ask, Slot, StorageRequest};
pub use state::{RequestState, SlotState};
pub use verifier::{NonEmptyProof, ProofVerifier};
