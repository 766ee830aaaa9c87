//! # stow-vault
//!
//! Token custody for the Stowage marketplace.
//!
//! The vault holds tokens on behalf of *controllers* (the contracts calling
//! it). Every controller sees its own isolated set of balances, keyed by a
//! [`Context`](stow_core::Context) and a recipient address:
//!
//! - **balance**: tokens held for the recipient
//! - **designated**: the part of the balance earmarked for the recipient;
//!   it can be withdrawn or burned but never transferred or streamed away
//! - **lock**: a context-wide time bound that blocks withdrawal until it
//!   expires and enables flows
//! - **flow**: a per-second stream from one recipient to another, settled
//!   lazily whenever the context is touched
//!
//! ## Example
//!
//! ```rust
//! use stow_core::{Address, Amount, Call, Context};
//! use stow_token::{Token, TokenLedger};
//! use stow_vault::Vault;
//!
//! let controller = Address::new([1u8; 32]);
//! let vault_address = Address::new([2u8; 32]);
//! let client = Address::new([3u8; 32]);
//! let context = Context::new([4u8; 32]);
//!
//! let mut token = TokenLedger::new();
//! token.mint(&controller, Amount::new(100));
//! token.approve(&controller, &vault_address, Amount::new(100));
//!
//! let mut vault = Vault::new(vault_address, token);
//! let call = Call::new(controller, 1_000);
//! vault.deposit(&call, context, client, Amount::new(100)).unwrap();
//! assert_eq!(vault.get_balance(&controller, &context, &client, 1_000), Amount::new(100));
//!
//! let paid = vault.withdraw(&call, context, client).unwrap();
//! assert_eq!(paid, Amount::new(100));
//! assert_eq!(vault.token().balance_of(&client), Amount::new(100));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod error;
pub mod vault;

pub use account::{Balance, Flow, Lock};
pub use error::{Result, VaultError};
pub use vault::Vault;
