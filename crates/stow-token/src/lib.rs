//! # stow-token
//!
//! The fungible token the marketplace settles in.
//!
//! The ledger only ever consumes the token through the [`Token`] trait:
//! balance queries, allowances, direct transfers and allowance-backed pulls.
//! [`TokenLedger`] is an in-memory implementation used for simulation and
//! tests.
//!
//! ## Example
//!
//! ```rust
//! use stow_core::{Address, Amount};
//! use stow_token::{Token, TokenLedger};
//!
//! let alice = Address::new([1u8; 32]);
//! let bob = Address::new([2u8; 32]);
//!
//! let mut token = TokenLedger::new();
//! token.mint(&alice, Amount::new(100));
//! token.transfer(&alice, &bob, Amount::new(40)).unwrap();
//! assert_eq!(token.balance_of(&bob), Amount::new(40));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ledger;

pub use error::{Result, TokenError};
pub use ledger::{Token, TokenLedger};
