//! Balance, lock and flow records.

use serde::{Deserialize, Serialize};
use stow_core::{Address, Amount, Timestamp};

/// The funds held for one recipient in one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Total tokens held.
    pub balance: Amount,
    /// Part of `balance` reserved for the recipient.
    pub designated: Amount,
}

impl Balance {
    /// Tokens that are not designated.
    #[must_use]
    pub const fn undesignated(&self) -> Amount {
        self.balance.saturating_sub(self.designated)
    }

    /// Returns true when nothing is held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.balance.is_zero()
    }
}

/// A time bound shared by every recipient in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Withdrawals are refused before this time.
    pub expiry: Timestamp,
    /// The expiry can never be extended past this time.
    pub maximum: Timestamp,
}

impl Lock {
    /// Returns true while the lock has not expired.
    #[must_use]
    pub const fn is_active(&self, now: Timestamp) -> bool {
        now < self.expiry
    }
}

/// A per-second stream of tokens between two recipients of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Recipient whose balance is drained.
    pub sender: Address,
    /// Recipient whose balance (and designated balance) grows.
    pub receiver: Address,
    /// Tokens moved per second.
    pub rate: Amount,
    /// Time up to which this flow has been applied to the balances.
    pub settled_at: Timestamp,
}

impl Flow {
    /// Tokens this flow has accrued since it was last settled, given that it
    /// stops at `until`.
    #[must_use]
    pub fn accrued(&self, until: Timestamp) -> Option<Amount> {
        let elapsed = until.saturating_sub(self.settled_at);
        self.rate.checked_mul(elapsed)
    }
}
