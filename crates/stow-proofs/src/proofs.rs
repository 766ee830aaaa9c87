//! Challenge scheduling and missed-proof detection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stow_core::{ProofId, Timestamp};
use tracing::debug;

use crate::config::ProofConfig;
use crate::error::{ProofError, Result};
use crate::randomness::{HashBeacon, RandomnessSource};

/// Index of a proof period: `floor(time / period)`.
pub type Period = u64;

/// The value a host must prove storage against in a given period.
pub type Challenge = [u8; 32];

#[derive(Debug, Clone)]
struct Schedule {
    probability: u64,
    start: Timestamp,
    end: Timestamp,
    missed: u64,
    submitted: HashSet<Period>,
    missing: HashSet<Period>,
}

/// Proof schedules keyed by [`ProofId`].
#[derive(Debug, Clone)]
pub struct Proofs {
    config: ProofConfig,
    randomness: Arc<dyn RandomnessSource>,
    schedules: HashMap<ProofId, Schedule>,
}

impl Proofs {
    /// Creates a scheduler drawing from the default [`HashBeacon`].
    #[must_use]
    pub fn new(config: ProofConfig) -> Self {
        Self::with_randomness(config, Arc::new(HashBeacon::default()))
    }

    /// Creates a scheduler drawing from `randomness`.
    #[must_use]
    pub fn with_randomness(config: ProofConfig, randomness: Arc<dyn RandomnessSource>) -> Self {
        Self {
            config,
            randomness,
            schedules: HashMap::new(),
        }
    }

    /// The scheduling constants.
    #[must_use]
    pub const fn config(&self) -> &ProofConfig {
        &self.config
    }

    /// Period containing `time`.
    #[must_use]
    pub fn period_of(&self, time: Timestamp) -> Period {
        time.checked_div(self.config.period).unwrap_or_default()
    }

    /// First second after `period`.
    #[must_use]
    pub fn period_end(&self, period: Period) -> Timestamp {
        period.saturating_add(1).saturating_mul(self.config.period)
    }

    /// Registers a schedule for `id` ending at `now + duration`.
    ///
    /// An id whose schedule has ended may be registered again.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::AlreadyInUse`] if the id has a schedule that has
    /// not ended and [`ProofError::InvalidProbability`] if `probability` is 0.
    pub fn expect_proofs(
        &mut self,
        id: ProofId,
        probability: u64,
        duration: u64,
        now: Timestamp,
    ) -> Result<()> {
        if probability == 0 {
            return Err(ProofError::InvalidProbability);
        }
        if self.schedules.get(&id).is_some_and(|schedule| schedule.end > now) {
            return Err(ProofError::AlreadyInUse);
        }
        let end = now.checked_add(duration).ok_or(ProofError::Overflow)?;
        self.schedules.insert(
            id,
            Schedule {
                probability,
                start: now,
                end,
                missed: 0,
                submitted: HashSet::new(),
                missing: HashSet::new(),
            },
        );
        debug!(id = %id, probability, end, "expecting proofs");
        Ok(())
    }

    /// Drops the schedule of `id`. Its missed count is forgotten.
    pub fn release(&mut self, id: &ProofId) {
        if self.schedules.remove(id).is_some() {
            debug!(id = %id, "proof schedule released");
        }
    }

    /// End of the schedule of `id`, if registered.
    #[must_use]
    pub fn end(&self, id: &ProofId) -> Option<Timestamp> {
        self.schedules.get(id).map(|schedule| schedule.end)
    }

    /// Returns true if a proof for `id` is required in the period containing
    /// `now`.
    #[must_use]
    pub fn is_proof_required(&self, id: &ProofId, now: Timestamp) -> bool {
        now < self.end(id).unwrap_or_default() && self.is_required_in(id, self.period_of(now))
    }

    /// Returns true if a proof for `id` was (or is) required in `period`.
    ///
    /// Never true in the period the schedule started in, in the period it
    /// ends in, or after it.
    #[must_use]
    pub fn is_required_in(&self, id: &ProofId, period: Period) -> bool {
        let Some(schedule) = self.schedules.get(id) else {
            return false;
        };
        if period <= self.period_of(schedule.start) || period >= self.period_of(schedule.end) {
            return false;
        }
        self.draw(id, schedule.probability, period)
    }

    /// Returns true if `period` is a downtime period for `id`.
    #[must_use]
    pub fn is_downtime(&self, id: &ProofId, period: Period) -> bool {
        self.pointer(id, period) < self.config.downtime
    }

    /// Challenge for `id` in the period containing `now`.
    #[must_use]
    pub fn get_challenge(&self, id: &ProofId, now: Timestamp) -> Challenge {
        let period = self.period_of(now);
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/challenge/");
        hasher.update(&self.randomness.randomness(period));
        hasher.update(id.as_bytes());
        hasher.update(&period.to_be_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Records a proof for the current period.
    ///
    /// `valid` is the outcome of verifying the proof against the challenge.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::ProofNotRequired`], [`ProofError::InvalidProof`]
    /// or [`ProofError::AlreadySubmitted`], checked in that order.
    pub fn submit_proof(&mut self, id: &ProofId, valid: bool, now: Timestamp) -> Result<()> {
        if !self.is_proof_required(id, now) {
            return Err(ProofError::ProofNotRequired);
        }
        if !valid {
            return Err(ProofError::InvalidProof);
        }
        let period = self.period_of(now);
        let schedule = self
            .schedules
            .get_mut(id)
            .ok_or(ProofError::ProofNotRequired)?;
        if !schedule.submitted.insert(period) {
            return Err(ProofError::AlreadySubmitted);
        }
        debug!(id = %id, period, "proof submitted");
        Ok(())
    }

    /// Marks the proof of `id` for `period` as missing and returns the new
    /// missed count.
    ///
    /// Allowed from the end of `period` until `timeout` seconds later.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::PeriodNotEnded`],
    /// [`ProofError::ValidationTimedOut`], [`ProofError::ProofNotRequired`],
    /// [`ProofError::AlreadySubmitted`] or
    /// [`ProofError::AlreadyMarkedMissing`], checked in that order.
    pub fn mark_proof_as_missing(
        &mut self,
        id: &ProofId,
        period: Period,
        now: Timestamp,
    ) -> Result<u64> {
        let period_end = self.period_end(period);
        if now < period_end {
            return Err(ProofError::PeriodNotEnded { period_end });
        }
        let deadline = period_end.saturating_add(self.config.timeout);
        if now >= deadline {
            return Err(ProofError::ValidationTimedOut { deadline });
        }
        if !self.is_required_in(id, period) {
            return Err(ProofError::ProofNotRequired);
        }
        let schedule = self
            .schedules
            .get_mut(id)
            .ok_or(ProofError::ProofNotRequired)?;
        if schedule.submitted.contains(&period) {
            return Err(ProofError::AlreadySubmitted);
        }
        if !schedule.missing.insert(period) {
            return Err(ProofError::AlreadyMarkedMissing);
        }
        schedule.missed += 1;
        debug!(id = %id, period, missed = schedule.missed, "proof marked as missing");
        Ok(schedule.missed)
    }

    /// Number of proofs of `id` marked as missing.
    #[must_use]
    pub fn missed(&self, id: &ProofId) -> u64 {
        self.schedules
            .get(id)
            .map(|schedule| schedule.missed)
            .unwrap_or_default()
    }

    /// Position of `period` in the 256-step downtime cycle of `id`. Ids are
    /// offset by their last byte so their downtimes do not coincide.
    fn pointer(&self, id: &ProofId, period: Period) -> u8 {
        let offset = u64::from(id.as_bytes()[31]);
        (period.wrapping_add(offset) % 256) as u8
    }

    fn draw(&self, id: &ProofId, probability: u64, period: Period) -> bool {
        if self.is_downtime(id, period) {
            return false;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stow/requirement/");
        hasher.update(&self.randomness.randomness(period));
        hasher.update(id.as_bytes());
        hasher.update(&period.to_be_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        let seed = u64::from_be_bytes(head);

        // Downtime periods are never required, so the draw in the remaining
        // ones is scaled up to keep the overall rate at 1 / probability.
        let active = 256 - u128::from(self.config.downtime);
        let modulus = (u128::from(probability) * active / 256).max(1);
        u128::from(seed) % modulus == 0
    }
}
