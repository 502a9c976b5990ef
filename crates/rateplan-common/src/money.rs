//! Money - operator-entered currency amounts
//!
//! Operators type amounts the way they read them ("$49.99", "1,200",
//! "USD 5"). Parsing keeps only digits and the decimal point, then
//! re-prefixes the configured currency symbol to produce the canonical
//! persisted form.

use crate::error::MoneyError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parsed monetary amount (Value Object)
///
/// # Invariants
/// - Amount is never negative (sign characters are stripped on input)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    symbol: String,
}

impl Money {
    /// Create money from an amount and a display symbol
    pub fn new(amount: Decimal, symbol: impl Into<String>) -> Self {
        Self {
            amount: amount.abs(),
            symbol: symbol.into(),
        }
    }

    /// Convert a float amount; `None` for NaN or infinite input
    pub fn from_f64(amount: f64, symbol: &str) -> Option<Self> {
        Decimal::from_f64(amount).map(|d| Self::new(d.normalize(), symbol))
    }

    /// Numeric amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Currency symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Canonical persisted form, e.g. `"$49.99"`
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.symbol, self.amount)
    }
}

/// Parse raw operator input into money.
///
/// Every character other than ASCII digits and `.` is dropped. Input with
/// no digits, or with more than one decimal point, is unparseable.
pub fn parse_money_input(raw: &str, symbol: &str) -> Result<Money, MoneyError> {
    let mut kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if !kept.chars().any(|c| c.is_ascii_digit()) || kept.matches('.').count() > 1 {
        return Err(MoneyError::Unparseable(raw.to_string()));
    }
    if kept.starts_with('.') {
        kept.insert(0, '0');
    }
    if kept.ends_with('.') {
        kept.pop();
    }

    Decimal::from_str(&kept)
        .map(|amount| Money::new(amount, symbol))
        .map_err(|_| MoneyError::Unparseable(raw.to_string()))
}
