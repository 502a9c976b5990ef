//! Value Objects - identifiers exchanged with the remote store

use crate::error::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Rate plan identifier minted by the remote store (Value Object)
///
/// # Invariants
/// - Must be non-empty
/// - Max 64 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatePlanId(String);

impl RatePlanId {
    /// Create new rate plan ID with validation
    pub fn new(id: impl Into<String>) -> CommonResult<Self> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(CommonError::InvalidRatePlanId("cannot be empty".into()));
        }
        if trimmed.len() > 64 {
            return Err(CommonError::InvalidRatePlanId("max 64 characters".into()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Get inner value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RatePlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated key for saves issued before a rate plan ID exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh token
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
