//! Wizard configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wizard configuration
///
/// Hosts usually deserialize this from their own settings document;
/// every field falls back to its default when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// Symbol prefixed to canonical money strings
    pub currency_symbol: String,
    /// ISO currency code installed in new flat fee payloads
    pub default_currency: String,
    /// Number of tiers in a fresh tiered/volume/stair-step payload
    pub default_tier_count: usize,
    /// Accept a tier price of exactly zero
    pub allow_zero_tier_price: bool,
    /// Deadline for one persistence call, in milliseconds
    pub save_timeout_ms: Option<u64>,
}

impl WizardConfig {
    /// Parse from a JSON document and validate
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("currency_symbol cannot be empty".into()));
        }
        if self.default_tier_count == 0 {
            return Err(ConfigError::Invalid("default_tier_count must be at least 1".into()));
        }
        if self.save_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("save_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Save deadline as a duration
    pub fn save_timeout(&self) -> Option<Duration> {
        self.save_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            currency_symbol: "$".into(),
            default_currency: "USD".into(),
            default_tier_count: 3,
            allow_zero_tier_price: false,
            save_timeout_ms: Some(30_000),
        }
    }
}
