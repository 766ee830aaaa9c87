//! Proof scheduling configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ProofError, Result};

/// Default period length in seconds.
pub const DEFAULT_PERIOD: u64 = 1800;

/// Default validation timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 5;

/// Default downtime, out of 256 pointer positions.
pub const DEFAULT_DOWNTIME: u8 = 64;

/// Deployment-time constants for proof scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    /// Length of a proof period in seconds.
    pub period: u64,

    /// Seconds after a period ends during which a missing proof can be
    /// marked.
    pub timeout: u64,

    /// Number of pointer positions (out of 256) in which no proof is
    /// required.
    pub downtime: u8,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            downtime: DEFAULT_DOWNTIME,
        }
    }
}

impl ProofConfig {
    /// Set the period length.
    #[must_use]
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// Set the validation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the downtime.
    #[must_use]
    pub fn with_downtime(mut self, downtime: u8) -> Self {
        self.downtime = downtime;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the period is zero or the timeout does not fit in a
    /// period.
    pub fn validate(&self) -> Result<()> {
        if self.period == 0 {
            return Err(ProofError::InvalidConfig("period must be non-zero".into()));
        }
        if self.timeout > self.period {
            return Err(ProofError::InvalidConfig(format!(
                "timeout {} exceeds period {}",
                self.timeout, self.period
            )));
        }
        Ok(())
    }
}
