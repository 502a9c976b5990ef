//! Tier List Editor
//!
//! Range-priced tiers shared by the tiered, volume and stair-step models.
//!
//! # Invariants
//! - At least one tier at all times
//! - Only the last tier may be unbounded, and only while `no_upper_limit` is set
//! - A valid list ascends: `tiers[i].to < tiers[i + 1].from`
//!
//! Numeric fields are `f64` so that unparseable operator input can be kept
//! as NaN and reported at validation time instead of being coerced to zero.

use serde::{Deserialize, Serialize};

use crate::validation::Diagnostic;

/// Upper end of a tier range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBound {
    /// Inclusive upper bound
    Bounded(f64),
    /// No upper limit (last tier only)
    Unbounded,
}

impl TierBound {
    /// Concrete bound, if any
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Bounded(v) => Some(*v),
            Self::Unbounded => None,
        }
    }

    /// Bounded with a usable number
    fn is_finite(&self) -> bool {
        matches!(self, Self::Bounded(v) if v.is_finite())
    }
}

/// A priced range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// First unit of the range
    pub from: f64,
    /// Last unit of the range
    pub to: TierBound,
    /// Price; NaN while unparseable
    pub price: f64,
}

impl Tier {
    /// All-zero tier used by fresh payloads
    pub const fn zeroed() -> Self {
        Self {
            from: 0.0,
            to: TierBound::Bounded(0.0),
            price: 0.0,
        }
    }

    /// Whether `units` falls inside this tier's range
    pub fn contains(&self, units: f64) -> bool {
        units >= self.from
            && match self.to {
                TierBound::Bounded(to) => units <= to,
                TierBound::Unbounded => true,
            }
    }
}

/// Editable tier field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierField {
    /// Lower bound
    From,
    /// Upper bound
    To,
    /// Price
    Price,
}

impl TierField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::Price => "price",
        }
    }
}

/// Field path for a tier cell, e.g. `tiers[2].price`
pub fn tier_field(index: usize, field: TierField) -> String {
    format!("tiers[{}].{}", index, field.as_str())
}

/// Ordered tier list with its terminal "no upper limit" flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierList {
    tiers: Vec<Tier>,
    no_upper_limit: bool,
}

impl TierList {
    /// `count` zeroed tiers (at least one)
    pub fn with_default_tiers(count: usize) -> Self {
        Self {
            tiers: vec![Tier::zeroed(); count.max(1)],
            no_upper_limit: false,
        }
    }

    /// Build from existing tiers; the flag follows the last tier's bound.
    ///
    /// Returns `None` for an empty list.
    pub fn from_tiers(tiers: Vec<Tier>) -> Option<Self> {
        let no_upper_limit = tiers.last()?.to == TierBound::Unbounded;
        Some(Self { tiers, no_upper_limit })
    }

    /// Tiers in order
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tier count
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Whether the last tier is open-ended
    pub fn no_upper_limit(&self) -> bool {
        self.no_upper_limit
    }

    /// Append a tier starting right after the current last tier.
    ///
    /// Rejected while the last tier is unbounded or its bound is not a number.
    pub fn add_tier(&mut self) -> Result<usize, Diagnostic> {
        let from = match self.tiers.last() {
            None => 0.0,
            Some(Tier { to: TierBound::Unbounded, .. }) => {
                return Err(Diagnostic::blocking(
                    tier_field(self.tiers.len() - 1, TierField::To),
                    "cannot add a tier after a tier with no upper limit",
                ));
            }
            Some(Tier { to: TierBound::Bounded(to), .. }) if to.is_finite() => to + 1.0,
            Some(_) => {
                return Err(Diagnostic::blocking(
                    tier_field(self.tiers.len() - 1, TierField::To),
                    "enter an upper bound for the last tier first",
                ));
            }
        };

        self.tiers.push(Tier {
            from,
            to: TierBound::Bounded(from),
            price: 0.0,
        });
        Ok(self.tiers.len() - 1)
    }

    /// Remove the tier at `index`; the last remaining tier cannot be removed
    pub fn remove_tier(&mut self, index: usize) -> Result<Tier, Diagnostic> {
        if self.tiers.len() <= 1 {
            return Err(Diagnostic::blocking("tiers", "cannot remove last tier"));
        }
        if index >= self.tiers.len() {
            return Err(out_of_range(index));
        }

        let removed = self.tiers.remove(index);
        if self.no_upper_limit {
            if let Some(last) = self.tiers.last_mut() {
                last.to = TierBound::Unbounded;
            }
        }
        Ok(removed)
    }

    /// Set one field from raw operator input.
    ///
    /// Unparseable input is stored as NaN and reported by `validate`.
    pub fn update_tier(&mut self, index: usize, field: TierField, raw: &str) -> Result<(), Diagnostic> {
        let last = self.tiers.len().saturating_sub(1);
        let tier = self.tiers.get_mut(index).ok_or_else(|| out_of_range(index))?;
        let value = parse_number(raw);

        match field {
            TierField::From => tier.from = value,
            TierField::Price => tier.price = value,
            TierField::To if self.no_upper_limit && index == last => {
                return Err(Diagnostic::blocking(
                    tier_field(index, TierField::To),
                    "tier has no upper limit",
                ));
            }
            TierField::To => tier.to = TierBound::Bounded(value),
        }
        Ok(())
    }

    /// Toggle the open-ended last tier.
    ///
    /// Turning the flag off never invents a bound: the last tier is left
    /// without one and stays invalid until a concrete `to` is entered.
    pub fn set_no_upper_limit(&mut self, enabled: bool) {
        if self.no_upper_limit == enabled {
            return;
        }
        self.no_upper_limit = enabled;
        if let Some(last) = self.tiers.last_mut() {
            last.to = if enabled {
                TierBound::Unbounded
            } else {
                TierBound::Bounded(f64::NAN)
            };
        }
    }

    /// Range and price rules, one diagnostic per offending tier cell
    pub fn validate(&self, allow_zero_price: bool) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let last = self.tiers.len().saturating_sub(1);

        if self.tiers.is_empty() {
            diagnostics.push(Diagnostic::blocking("tiers", "at least one tier is required"));
            return diagnostics;
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if !tier.from.is_finite() {
                diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::From), "must be a number"));
            } else if tier.from < 0.0 {
                diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::From), "cannot be negative"));
            }

            match tier.to {
                TierBound::Unbounded if i != last || !self.no_upper_limit => {
                    diagnostics.push(Diagnostic::blocking(
                        tier_field(i, TierField::To),
                        "only the last tier may have no upper limit",
                    ));
                }
                TierBound::Unbounded => {}
                TierBound::Bounded(to) if !to.is_finite() => {
                    diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::To), "upper bound is required"));
                }
                TierBound::Bounded(to) if tier.from.is_finite() && to < tier.from => {
                    diagnostics.push(Diagnostic::blocking(
                        tier_field(i, TierField::To),
                        "must be greater than or equal to from",
                    ));
                }
                TierBound::Bounded(_) => {}
            }

            if tier.price.is_nan() {
                diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::Price), "must be a number"));
            } else if tier.price < 0.0 {
                diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::Price), "cannot be negative"));
            } else if tier.price == 0.0 && !allow_zero_price {
                diagnostics.push(Diagnostic::blocking(tier_field(i, TierField::Price), "price is required"));
            }
        }

        for (i, pair) in self.tiers.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            if !current.from.is_finite() || !next.from.is_finite() {
                continue;
            }
            if next.from <= current.from {
                diagnostics.push(Diagnostic::blocking(
                    tier_field(i + 1, TierField::From),
                    format!("must be greater than tier {} start", i + 1),
                ));
                continue;
            }
            if !current.to.is_finite() {
                continue;
            }
            let to = current.to.value().unwrap_or(f64::NAN);
            if to >= next.from {
                diagnostics.push(Diagnostic::blocking(
                    tier_field(i + 1, TierField::From),
                    format!("overlaps tier {} which ends at {}", i + 1, to),
                ));
            } else if to + 1.0 < next.from {
                diagnostics.push(Diagnostic::warning(
                    tier_field(i + 1, TierField::From),
                    format!("leaves a gap after tier {} which ends at {}", i + 1, to),
                ));
            }
        }

        diagnostics
    }
}

fn out_of_range(index: usize) -> Diagnostic {
    Diagnostic::blocking(format!("tiers[{}]", index), "no such tier")
}

fn parse_number(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(f64::NAN)
}
