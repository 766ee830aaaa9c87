//! Time and call context.
//!
//! The ledger observes time as whole seconds. Each operation samples the clock
//! exactly once and carries that sample in its [`Call`], so period boundaries,
//! lock expiry and proof windows are pure functions of a single value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Address;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// The caller of an operation and the time it executes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Address the operation is executed on behalf of.
    pub caller: Address,
    /// Time sampled for this operation.
    pub now: Timestamp,
}

impl Call {
    /// Creates a call context.
    #[must_use]
    pub const fn new(caller: Address, now: Timestamp) -> Self {
        Self { caller, now }
    }

    /// The same call re-issued by `caller` (a contract calling another
    /// contract) at the same time.
    #[must_use]
    pub const fn forward(&self, caller: Address) -> Self {
        Self {
            caller,
            now: self.now,
        }
    }
}

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock starting at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Moves the clock to `time`. Never moves backwards.
    pub fn set(&self, time: Timestamp) {
        self.now.fetch_max(time, Ordering::SeqCst);
    }

    /// Advances the clock by `seconds`.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
