//! Marketplace configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stow_core::Amount;
use stow_proofs::ProofConfig;

use crate::error::{MarketError, Result};

/// How collateral is slashed for missed proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateralConfig {
    /// Percentage of the collateral burned per missed proof.
    pub slash_percentage: u8,

    /// Number of missed proofs after which a slot is forcibly freed.
    pub max_missed_proofs: u64,
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            slash_percentage: 10,
            max_missed_proofs: 10,
        }
    }
}

impl CollateralConfig {
    /// Collateral burned after `missed` missed proofs, capped at all of it.
    #[must_use]
    pub fn slashed(&self, collateral: Amount, missed: u64) -> Amount {
        let percentage = missed
            .saturating_mul(u64::from(self.slash_percentage))
            .min(100);
        collateral.mul_div(percentage, 100).unwrap_or(collateral)
    }
}

/// Deployment-time marketplace configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Proof scheduling constants.
    pub proofs: ProofConfig,

    /// Collateral slashing policy.
    pub collateral: CollateralConfig,
}

impl MarketplaceConfig {
    /// Set the proof configuration.
    #[must_use]
    pub fn with_proofs(mut self, proofs: ProofConfig) -> Self {
        self.proofs = proofs;
        self
    }

    /// Set the collateral configuration.
    #[must_use]
    pub fn with_collateral(mut self, collateral: CollateralConfig) -> Self {
        self.collateral = collateral;
        self
    }

    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidConfig`] if the JSON is malformed or the
    /// values are invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MarketError::InvalidConfig(format!("failed to parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidConfig`] if the file cannot be read or
    /// its contents are invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            MarketError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidConfig`] describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<()> {
        self.proofs
            .validate()
            .map_err(|e| MarketError::InvalidConfig(e.to_string()))?;
        if self.collateral.slash_percentage > 100 {
            return Err(MarketError::InvalidConfig(format!(
                "slash percentage {} exceeds 100",
                self.collateral.slash_percentage
            )));
        }
        if self.collateral.max_missed_proofs == 0 {
            return Err(MarketError::InvalidConfig(
                "max missed proofs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
