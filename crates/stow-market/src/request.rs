//! Storage requests, asks and slots.

use serde::{Deserialize, Serialize};
use stow_core::{Address, Amount, RequestId, SlotId, Timestamp};

use crate::error::{MarketError, Result};

/// What a client asks hosts to do, and what it pays for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ask {
    /// Number of slots the content is split into.
    pub slots: u64,
    /// Size of each slot in bytes.
    pub slot_size: u64,
    /// Seconds the content must be stored.
    pub duration: u64,
    /// A proof is required about once every `proof_probability` periods.
    pub proof_probability: u64,
    /// Tokens paid per slot per second.
    pub reward: Amount,
    /// Collateral a host must post per slot.
    pub collateral: Amount,
    /// Slots that may be lost before the request fails.
    pub max_slot_loss: u64,
    /// Seconds after creation during which slots must be filled.
    pub expiry: u64,
}

impl Ask {
    /// Tokens a single slot earns between `start` and `end`.
    #[must_use]
    pub fn payout_for_duration(&self, start: Timestamp, end: Timestamp) -> Option<Amount> {
        self.reward.checked_mul(end.saturating_sub(start))
    }

    /// Tokens a single slot earns over the whole duration.
    #[must_use]
    pub fn price_per_slot(&self) -> Option<Amount> {
        self.reward.checked_mul(self.duration)
    }

    /// Checks that the ask can be fulfilled.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidAsk`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(MarketError::InvalidAsk("slots must be non-zero".into()));
        }
        if self.proof_probability == 0 {
            return Err(MarketError::InvalidAsk(
                "proof probability must be non-zero".into(),
            ));
        }
        if self.expiry == 0 || self.expiry > self.duration {
            return Err(MarketError::InvalidAsk(format!(
                "expiry {} must be within duration {}",
                self.expiry, self.duration
            )));
        }
        if self.max_slot_loss > self.slots {
            return Err(MarketError::InvalidAsk(format!(
                "max slot loss {} exceeds slots {}",
                self.max_slot_loss, self.slots
            )));
        }
        Ok(())
    }
}

/// A client's storage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRequest {
    /// Who pays.
    pub client: Address,
    /// Terms.
    pub ask: Ask,
    /// Content identifier.
    pub content: [u8; 32],
    /// Lets a client post identical asks for the same content.
    pub nonce: [u8; 32],
}

impl StorageRequest {
    /// The request id: a hash over every field.
    #[must_use]
    pub fn id(&self) -> RequestId {
        let ask = &self.ask;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/request/");
        hasher.update(self.client.as_bytes());
        for field in [
            ask.slots,
            ask.slot_size,
            ask.duration,
            ask.proof_probability,
            ask.reward.units(),
            ask.collateral.units(),
            ask.max_slot_loss,
            ask.expiry,
        ] {
            hasher.update(&field.to_be_bytes());
        }
        hasher.update(&self.content);
        hasher.update(&self.nonce);
        RequestId::new(*hasher.finalize().as_bytes())
    }

    /// Total escrowed for the request: every slot paid for the full duration.
    #[must_use]
    pub fn price(&self) -> Option<Amount> {
        self.ask.price_per_slot()?.checked_mul(self.ask.slots)
    }

    /// Slot `index` of this request.
    #[must_use]
    pub fn slot(&self, index: u64) -> Slot {
        Slot {
            request: self.id(),
            index,
        }
    }
}

/// One piece of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Parent request.
    pub request: RequestId,
    /// Position within the request.
    pub index: u64,
}

impl Slot {
    /// The slot id.
    #[must_use]
    pub fn id(&self) -> SlotId {
        SlotId::derive(&self.request, self.index)
    }
}
