//! Error types shared across the rate plan wizard

use thiserror::Error;

/// Money input could not be turned into an amount
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Nothing numeric survived stripping, or the digits are malformed
    #[error("not a currency amount: {0:?}")]
    Unparseable(String),
}

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config document failed to deserialize
    #[error("config parse error: {0}")]
    Parse(String),

    /// Config parsed but violates a constraint
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shared error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Rate plan identifier rejected
    #[error("invalid rate plan ID: {0}")]
    InvalidRatePlanId(String),

    /// Money parsing error
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for shared primitives
pub type CommonResult<T> = Result<T, CommonError>;
