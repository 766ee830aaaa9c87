//! Marketplace notifications.

use serde::{Deserialize, Serialize};
use stow_core::{RequestId, SlotId};
use stow_proofs::Period;

use crate::request::Ask;

/// Something observable happened in the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A client posted a request.
    StorageRequested {
        /// The request.
        request_id: RequestId,
        /// Its terms.
        ask: Ask,
    },
    /// A host filled a slot.
    SlotFilled {
        /// Parent request.
        request_id: RequestId,
        /// Slot index.
        index: u64,
        /// Slot id.
        slot_id: SlotId,
    },
    /// A slot lost its host.
    SlotFreed {
        /// Parent request.
        request_id: RequestId,
        /// Slot id.
        slot_id: SlotId,
    },
    /// Every slot of a request was filled.
    RequestFulfilled {
        /// The request.
        request_id: RequestId,
    },
    /// A client withdrew the funds of an expired request.
    RequestCancelled {
        /// The request.
        request_id: RequestId,
    },
    /// Too many slots were freed.
    RequestFailed {
        /// The request.
        request_id: RequestId,
    },
    /// A host was paid for a slot.
    SlotPaid {
        /// Parent request.
        request_id: RequestId,
        /// Slot id.
        slot_id: SlotId,
    },
    /// A storage proof was accepted.
    ProofSubmitted {
        /// Slot id.
        slot_id: SlotId,
    },
    /// A required proof was marked as missing.
    ProofMarkedMissing {
        /// Slot id.
        slot_id: SlotId,
        /// Period the proof was missed in.
        period: Period,
    },
}
