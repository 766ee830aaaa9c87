//! Request and slot states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a storage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Waiting for hosts to fill every slot.
    New,
    /// Every slot was filled before expiry; storage is running.
    Started,
    /// Expired before every slot was filled.
    Cancelled,
    /// The duration elapsed without failure.
    Finished,
    /// More than `max_slot_loss` slots were freed.
    Failed,
}

impl RequestState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use RequestState::{Cancelled, Failed, Finished, New, Started};

        matches!(
            (self, target),
            (New, Started | Cancelled) | (Started, Finished | Failed)
        )
    }

    /// Returns true for states that never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished | Self::Failed)
    }

    /// Returns true while slots can be filled and proofs submitted.
    #[must_use]
    pub const fn accepts_proofs(&self) -> bool {
        matches!(self, Self::New | Self::Started)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Started => write!(f, "Started"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Finished => write!(f, "Finished"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// No host.
    Free,
    /// A host stores the slot and proves it.
    Filled,
    /// The request finished; waiting for payout.
    Finished,
    /// The request expired before it started; waiting for payout.
    Cancelled,
    /// The request failed; waiting for payout.
    Failed,
    /// The host was paid.
    Paid,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::Filled => write!(f, "Filled"),
            Self::Finished => write!(f, "Finished"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
            Self::Paid => write!(f, "Paid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(RequestState::New, RequestState::Started => true)]
    #[test_case(RequestState::New, RequestState::Cancelled => true)]
    #[test_case(RequestState::Started, RequestState::Finished => true)]
    #[test_case(RequestState::Started, RequestState::Failed => true)]
    #[test_case(RequestState::New, RequestState::Failed => false)]
    #[test_case(RequestState::Started, RequestState::New => false)]
    #[test_case(RequestState::Cancelled, RequestState::New => false)]
    #[test_case(RequestState::Failed, RequestState::Started => false)]
    #[test_case(RequestState::Finished, RequestState::Started => false)]
    fn transitions(from: RequestState, to: RequestState) -> bool {
        from.can_transition_to(&to)
    }

    #[test]
    fn terminal_states_do_not_accept_proofs() {
        for state in [
            RequestState::Cancelled,
            RequestState::Finished,
            RequestState::Failed,
        ] {
            assert!(state.is_terminal());
            assert!(!state.accepts_proofs());
        }
        assert!(RequestState::New.accepts_proofs());
        assert!(RequestState::Started.accepts_proofs());
    }
}
