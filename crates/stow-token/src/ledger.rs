//! Token balances, transfers and allowances.

use std::collections::HashMap;

use stow_core::{Address, Amount};
use tracing::debug;

use crate::error::{Result, TokenError};

/// The operations the marketplace and vault need from a fungible token.
///
/// A failed transfer leaves every balance and allowance untouched.
pub trait Token {
    /// Returns the balance held by `owner`.
    fn balance_of(&self, owner: &Address) -> Amount;

    /// Returns how much `spender` may still pull from `owner`.
    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    /// Sets the allowance of `spender` over `owner`'s tokens.
    fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount);

    /// Moves `amount` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InsufficientBalance`] if `from` holds too little.
    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()>;

    /// Moves `amount` from `from` to `to` on behalf of `spender`, consuming
    /// allowance.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InsufficientAllowance`] or
    /// [`TokenError::InsufficientBalance`].
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<()>;
}

/// In-memory token ledger.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    supply: Amount,
}

impl TokenLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `amount` new tokens for `to`. Saturates at [`Amount::MAX`].
    pub fn mint(&mut self, to: &Address, amount: Amount) {
        let balance = self.balances.entry(*to).or_default();
        *balance = balance.saturating_add(amount);
        self.supply = self.supply.saturating_add(amount);
        debug!(to = %to, amount = %amount, "minted tokens");
    }

    /// Total tokens ever minted.
    #[must_use]
    pub fn total_supply(&self) -> Amount {
        self.supply
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        let have = self.balance_of(from);
        let remaining = have.checked_sub(amount).ok_or(TokenError::InsufficientBalance {
            have,
            need: amount,
        })?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        self.balances.insert(*from, remaining);
        self.balances.insert(*to, credited);
        Ok(())
    }
}

impl Token for TokenLedger {
    fn balance_of(&self, owner: &Address) -> Amount {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.allowances.insert((*owner, *spender), amount);
        debug!(owner = %owner, spender = %spender, amount = %amount, "approved allowance");
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.move_balance(from, to, amount)?;
        debug!(from = %from, to = %to, amount = %amount, "transfer completed");
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<()> {
        let have = self.allowance(from, spender);
        let remaining = have
            .checked_sub(amount)
            .ok_or(TokenError::InsufficientAllowance { have, need: amount })?;
        self.move_balance(from, to, amount)?;
        self.allowances.insert((*from, *spender), remaining);
        debug!(spender = %spender, from = %from, to = %to, amount = %amount, "transfer_from completed");
        Ok(())
    }
}
