//! # stow-core
//!
//! Shared primitives for the Stowage storage marketplace.
//!
//! This crate provides:
//!
//! - [`Amount`]: overflow-checked token amounts
//! - [`Address`]: 32-byte account addresses, including derived (keyless) accounts
//! - [`RequestId`], [`SlotId`], [`ProofId`], [`Context`]: 32-byte identifiers
//! - [`Call`]: the caller and the single time sample of one operation
//! - [`Clock`]: time sources for the transaction sequencer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod amount;
pub mod error;
pub mod id;
pub mod time;

pub use address::Address;
pub use amount::Amount;
pub use error::CoreError;
pub use id::{Context, ProofId, RequestId, SlotId};
pub use time::{Call, Clock, ManualClock, SystemClock, Timestamp};
