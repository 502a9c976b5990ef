//! Pricing Models
//!
//! A rate plan carries exactly one pricing model. Each model has a
//! strategy that knows its default payload, its validation rules, how to
//! normalize it for persistence and how to price a quantity of usage.

use rateplan_common::{parse_money_input, Money, MoneyError, WizardConfig};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::tiers::{TierBound, TierList};
use crate::validation::{has_blocking, Diagnostic};

/// Pricing model selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModelType {
    /// Fixed recurring fee
    FlatFee,
    /// Each unit priced by the tier it falls in
    Tiered,
    /// All units priced by the tier the total falls in
    Volume,
    /// Fixed price per tier reached
    StairStep,
    /// Single per-unit price
    Usage,
}

impl PricingModelType {
    /// All models in display order
    pub const ALL: [PricingModelType; 5] = [
        Self::FlatFee,
        Self::Tiered,
        Self::Volume,
        Self::StairStep,
        Self::Usage,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlatFee => "flat_fee",
            Self::Tiered => "tiered",
            Self::Volume => "volume",
            Self::StairStep => "stair_step",
            Self::Usage => "usage",
        }
    }
}

impl fmt::Display for PricingModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat fee as entered by the operator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlatFeePayload {
    /// Amount charged every period
    pub recurring_fee: String,
    /// Descriptive allowance, not enforced
    pub usage_limit: String,
    /// Currency code
    pub currency: String,
}

/// Per-unit price as entered by the operator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsagePayload {
    /// Price of one unit
    pub per_unit_amount: String,
}

/// Data of the active pricing model; only one variant ever exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PricingPayload {
    /// Flat fee
    FlatFee(FlatFeePayload),
    /// Graduated tiers
    Tiered(TierList),
    /// Volume tiers
    Volume(TierList),
    /// Stair-step tiers
    StairStep(TierList),
    /// Per-unit usage
    Usage(UsagePayload),
}

impl PricingPayload {
    /// Model this payload belongs to
    pub fn model_type(&self) -> PricingModelType {
        match self {
            Self::FlatFee(_) => PricingModelType::FlatFee,
            Self::Tiered(_) => PricingModelType::Tiered,
            Self::Volume(_) => PricingModelType::Volume,
            Self::StairStep(_) => PricingModelType::StairStep,
            Self::Usage(_) => PricingModelType::Usage,
        }
    }

    /// Tier list for the range-priced models
    pub fn tiers(&self) -> Option<&TierList> {
        match self {
            Self::Tiered(list) | Self::Volume(list) | Self::StairStep(list) => Some(list),
            _ => None,
        }
    }

    /// Mutable tier list for the range-priced models
    pub fn tiers_mut(&mut self) -> Option<&mut TierList> {
        match self {
            Self::Tiered(list) | Self::Volume(list) | Self::StairStep(list) => Some(list),
            _ => None,
        }
    }
}

/// Normalized flat fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedFlatFee {
    /// Canonical money string
    pub recurring_fee: String,
    /// Allowance as entered
    pub usage_limit: String,
    /// Currency code
    pub currency: String,
}

/// Normalized tier; `to` is `None` for the open-ended last tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTier {
    /// First unit
    pub from: f64,
    /// Last unit
    pub to: Option<f64>,
    /// Canonical money string
    pub price: String,
}

/// Normalized tier list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTiers {
    /// Tiers in ascending order
    pub tiers: Vec<NormalizedTier>,
}

/// Normalized usage price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUsage {
    /// Canonical money string
    pub per_unit_amount: String,
}

/// Pricing sub-resource sent to the store, keyed by model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum NormalizedPricing {
    /// Flat fee
    FlatFee(NormalizedFlatFee),
    /// Graduated tiers
    Tiered(NormalizedTiers),
    /// Volume tiers
    Volume(NormalizedTiers),
    /// Stair-step tiers
    StairStep(NormalizedTiers),
    /// Per-unit usage
    Usage(NormalizedUsage),
}

impl NormalizedPricing {
    /// Model this payload belongs to
    pub fn model_type(&self) -> PricingModelType {
        match self {
            Self::FlatFee(_) => PricingModelType::FlatFee,
            Self::Tiered(_) => PricingModelType::Tiered,
            Self::Volume(_) => PricingModelType::Volume,
            Self::StairStep(_) => PricingModelType::StairStep,
            Self::Usage(_) => PricingModelType::Usage,
        }
    }
}

/// Pricing errors
#[derive(Debug, Clone, Error)]
pub enum PricingError {
    /// Payload belongs to another model
    #[error("{expected} strategy received a {found} payload")]
    PayloadMismatch {
        /// Model the strategy handles
        expected: PricingModelType,
        /// Model of the payload it was given
        found: PricingModelType,
    },

    /// Payload has blocking diagnostics
    #[error("payload has {} blocking diagnostic(s)", .0.len())]
    Invalid(Vec<Diagnostic>),
}

/// Behaviour of one pricing model
pub trait PricingModelStrategy: Send + Sync {
    /// Model handled by this strategy
    fn model_type(&self) -> PricingModelType;

    /// Zeroed payload installed when the model is selected
    fn default_payload(&self) -> PricingPayload;

    /// Model-specific rules
    fn compute_is_valid(&self, payload: &PricingPayload) -> Vec<Diagnostic>;

    /// Payload with display formatting removed and money canonicalized.
    ///
    /// Fails when the payload still has blocking diagnostics.
    fn to_persistence_payload(&self, payload: &PricingPayload) -> Result<NormalizedPricing, PricingError>;

    /// Charge for `units` of usage in one billing period; `None` when the
    /// payload is invalid or `units` falls outside every tier
    fn estimate(&self, payload: &PricingPayload, units: u64) -> Option<Decimal>;

    /// Operator input to canonical money
    fn parse_money_input(&self, raw: &str) -> Result<Money, MoneyError>;
}

fn mismatch(expected: PricingModelType, payload: &PricingPayload) -> PricingError {
    tracing::error!(
        expected = %expected,
        found = %payload.model_type(),
        "pricing payload routed to the wrong strategy"
    );
    PricingError::PayloadMismatch {
        expected,
        found: payload.model_type(),
    }
}

fn mismatch_diagnostics(expected: PricingModelType, payload: &PricingPayload) -> Vec<Diagnostic> {
    let err = mismatch(expected, payload);
    vec![Diagnostic::blocking("pricingModelType", err.to_string())]
}

fn ensure_valid(diagnostics: Vec<Diagnostic>) -> Result<(), PricingError> {
    if has_blocking(&diagnostics) {
        return Err(PricingError::Invalid(
            diagnostics.into_iter().filter(|d| d.blocking).collect(),
        ));
    }
    Ok(())
}

/// Required positive money field
fn check_amount(symbol: &str, field: &str, label: &str, raw: &str, out: &mut Vec<Diagnostic>) {
    if raw.trim().is_empty() {
        out.push(Diagnostic::blocking(field, format!("{} is required", label)));
        return;
    }
    match parse_money_input(raw, symbol) {
        Err(_) => out.push(Diagnostic::blocking(field, "must be a currency amount")),
        Ok(money) if !money.is_positive() => {
            out.push(Diagnostic::blocking(field, "must be greater than zero"))
        }
        Ok(_) => {}
    }
}

// === Flat fee ===

/// Fixed recurring fee with a descriptive usage allowance
pub struct FlatFeeStrategy {
    config: WizardConfig,
}

impl FlatFeeStrategy {
    /// Strategy using `config` for money parsing
    pub fn new(config: WizardConfig) -> Self {
        Self { config }
    }

    fn payload<'a>(&self, payload: &'a PricingPayload) -> Result<&'a FlatFeePayload, PricingError> {
        match payload {
            PricingPayload::FlatFee(flat) => Ok(flat),
            other => Err(mismatch(PricingModelType::FlatFee, other)),
        }
    }
}

impl PricingModelStrategy for FlatFeeStrategy {
    fn model_type(&self) -> PricingModelType {
        PricingModelType::FlatFee
    }

    fn default_payload(&self) -> PricingPayload {
        PricingPayload::FlatFee(FlatFeePayload {
            currency: self.config.default_currency.clone(),
            ..Default::default()
        })
    }

    fn compute_is_valid(&self, payload: &PricingPayload) -> Vec<Diagnostic> {
        let PricingPayload::FlatFee(flat) = payload else {
            return mismatch_diagnostics(PricingModelType::FlatFee, payload);
        };

        let mut diagnostics = Vec::new();
        check_amount(
            &self.config.currency_symbol,
            "recurringFee",
            "recurring fee",
            &flat.recurring_fee,
            &mut diagnostics,
        );
        if flat.usage_limit.trim().is_empty() {
            diagnostics.push(Diagnostic::blocking("usageLimit", "usage limit is required"));
        }
        diagnostics
    }

    fn to_persistence_payload(&self, payload: &PricingPayload) -> Result<NormalizedPricing, PricingError> {
        let flat = self.payload(payload)?;
        ensure_valid(self.compute_is_valid(payload))?;

        let recurring_fee = self
            .parse_money_input(&flat.recurring_fee)
            .map_err(|e| PricingError::Invalid(vec![Diagnostic::blocking("recurringFee", e.to_string())]))?;
        let currency = match flat.currency.trim() {
            "" => self.config.default_currency.clone(),
            code => code.to_uppercase(),
        };

        Ok(NormalizedPricing::FlatFee(NormalizedFlatFee {
            recurring_fee: recurring_fee.canonical(),
            usage_limit: flat.usage_limit.trim().to_string(),
            currency,
        }))
    }

    fn estimate(&self, payload: &PricingPayload, _units: u64) -> Option<Decimal> {
        let flat = self.payload(payload).ok()?;
        self.parse_money_input(&flat.recurring_fee)
            .ok()
            .filter(Money::is_positive)
            .map(|m| m.amount())
    }

    fn parse_money_input(&self, raw: &str) -> Result<Money, MoneyError> {
        parse_money_input(raw, &self.config.currency_symbol)
    }
}

// === Tiered / Volume / Stair-step ===

/// Range-priced models; they share tier editing and rules and differ in
/// how a quantity is charged:
/// - `Tiered`: each unit pays the price of the tier it falls in
/// - `Volume`: every unit pays the price of the tier the total falls in
/// - `StairStep`: the tier the total falls in charges its price once
pub struct TierStrategy {
    model: PricingModelType,
    config: WizardConfig,
}

impl TierStrategy {
    /// Only `Tiered`, `Volume` and `StairStep` are meaningful here
    pub fn new(model: PricingModelType, config: WizardConfig) -> Self {
        debug_assert!(matches!(
            model,
            PricingModelType::Tiered | PricingModelType::Volume | PricingModelType::StairStep
        ));
        Self { model, config }
    }

    fn list<'a>(&self, payload: &'a PricingPayload) -> Result<&'a TierList, PricingError> {
        match payload.tiers() {
            Some(list) if payload.model_type() == self.model => Ok(list),
            _ => Err(mismatch(self.model, payload)),
        }
    }

    fn graduated(list: &TierList, units: f64) -> Option<Decimal> {
        let mut total = Decimal::ZERO;
        for tier in list.tiers() {
            let upper = tier.to.value().map_or(units, |to| to.min(units));
            let lower = tier.from.max(1.0);
            if upper >= lower {
                let count = Decimal::from_f64(upper - lower + 1.0)?;
                total = total.checked_add(Decimal::from_f64(tier.price)?.checked_mul(count)?)?;
            }
        }
        Some(total)
    }
}

impl PricingModelStrategy for TierStrategy {
    fn model_type(&self) -> PricingModelType {
        self.model
    }

    fn default_payload(&self) -> PricingPayload {
        let list = TierList::with_default_tiers(self.config.default_tier_count);
        match self.model {
            PricingModelType::Volume => PricingPayload::Volume(list),
            PricingModelType::StairStep => PricingPayload::StairStep(list),
            _ => PricingPayload::Tiered(list),
        }
    }

    fn compute_is_valid(&self, payload: &PricingPayload) -> Vec<Diagnostic> {
        match self.list(payload) {
            Ok(list) => list.validate(self.config.allow_zero_tier_price),
            Err(err) => vec![Diagnostic::blocking("pricingModelType", err.to_string())],
        }
    }

    fn to_persistence_payload(&self, payload: &PricingPayload) -> Result<NormalizedPricing, PricingError> {
        let list = self.list(payload)?;
        ensure_valid(self.compute_is_valid(payload))?;

        let mut tiers = Vec::with_capacity(list.len());
        for (i, tier) in list.tiers().iter().enumerate() {
            let price = Money::from_f64(tier.price, &self.config.currency_symbol).ok_or_else(|| {
                PricingError::Invalid(vec![Diagnostic::blocking(
                    crate::tiers::tier_field(i, crate::tiers::TierField::Price),
                    "must be a number",
                )])
            })?;
            tiers.push(NormalizedTier {
                from: tier.from,
                to: tier.to.value(),
                price: price.canonical(),
            });
        }

        let normalized = NormalizedTiers { tiers };
        Ok(match self.model {
            PricingModelType::Volume => NormalizedPricing::Volume(normalized),
            PricingModelType::StairStep => NormalizedPricing::StairStep(normalized),
            _ => NormalizedPricing::Tiered(normalized),
        })
    }

    fn estimate(&self, payload: &PricingPayload, units: u64) -> Option<Decimal> {
        let list = self.list(payload).ok()?;
        if has_blocking(&list.validate(self.config.allow_zero_tier_price)) {
            return None;
        }

        let quantity = units as f64;
        let covered = list
            .tiers()
            .last()
            .map_or(false, |t| t.to == TierBound::Unbounded || t.to.value().map_or(false, |to| quantity <= to));
        if !covered {
            return None;
        }

        match self.model {
            PricingModelType::Volume => {
                let tier = list.tiers().iter().find(|t| t.contains(quantity))?;
                Decimal::from_f64(tier.price)?.checked_mul(Decimal::from(units))
            }
            PricingModelType::StairStep => {
                let tier = list.tiers().iter().find(|t| t.contains(quantity))?;
                Decimal::from_f64(tier.price)
            }
            _ => Self::graduated(list, quantity),
        }
    }

    fn parse_money_input(&self, raw: &str) -> Result<Money, MoneyError> {
        parse_money_input(raw, &self.config.currency_symbol)
    }
}

// === Usage ===

/// Pay per unit consumed
pub struct UsageStrategy {
    config: WizardConfig,
}

impl UsageStrategy {
    /// Strategy using `config` for money parsing
    pub fn new(config: WizardConfig) -> Self {
        Self { config }
    }

    fn payload<'a>(&self, payload: &'a PricingPayload) -> Result<&'a UsagePayload, PricingError> {
        match payload {
            PricingPayload::Usage(usage) => Ok(usage),
            other => Err(mismatch(PricingModelType::Usage, other)),
        }
    }
}

impl PricingModelStrategy for UsageStrategy {
    fn model_type(&self) -> PricingModelType {
        PricingModelType::Usage
    }

    fn default_payload(&self) -> PricingPayload {
        PricingPayload::Usage(UsagePayload::default())
    }

    fn compute_is_valid(&self, payload: &PricingPayload) -> Vec<Diagnostic> {
        let PricingPayload::Usage(usage) = payload else {
            return mismatch_diagnostics(PricingModelType::Usage, payload);
        };

        let mut diagnostics = Vec::new();
        check_amount(
            &self.config.currency_symbol,
            "perUnitAmount",
            "per unit amount",
            &usage.per_unit_amount,
            &mut diagnostics,
        );
        diagnostics
    }

    fn to_persistence_payload(&self, payload: &PricingPayload) -> Result<NormalizedPricing, PricingError> {
        let usage = self.payload(payload)?;
        ensure_valid(self.compute_is_valid(payload))?;

        let amount = self
            .parse_money_input(&usage.per_unit_amount)
            .map_err(|e| PricingError::Invalid(vec![Diagnostic::blocking("perUnitAmount", e.to_string())]))?;
        Ok(NormalizedPricing::Usage(NormalizedUsage {
            per_unit_amount: amount.canonical(),
        }))
    }

    fn estimate(&self, payload: &PricingPayload, units: u64) -> Option<Decimal> {
        let usage = self.payload(payload).ok()?;
        let amount = self.parse_money_input(&usage.per_unit_amount).ok()?;
        if !amount.is_positive() {
            return None;
        }
        amount.amount().checked_mul(Decimal::from(units))
    }

    fn parse_money_input(&self, raw: &str) -> Result<Money, MoneyError> {
        parse_money_input(raw, &self.config.currency_symbol)
    }
}

/// One strategy per model
pub struct PricingStrategies {
    flat_fee: FlatFeeStrategy,
    tiered: TierStrategy,
    volume: TierStrategy,
    stair_step: TierStrategy,
    usage: UsageStrategy,
}

impl PricingStrategies {
    /// One strategy per model
    pub fn new(config: &WizardConfig) -> Self {
        Self {
            flat_fee: FlatFeeStrategy::new(config.clone()),
            tiered: TierStrategy::new(PricingModelType::Tiered, config.clone()),
            volume: TierStrategy::new(PricingModelType::Volume, config.clone()),
            stair_step: TierStrategy::new(PricingModelType::StairStep, config.clone()),
            usage: UsageStrategy::new(config.clone()),
        }
    }

    /// Strategy for a model
    pub fn get(&self, model: PricingModelType) -> &dyn PricingModelStrategy {
        match model {
            PricingModelType::FlatFee => &self.flat_fee,
            PricingModelType::Tiered => &self.tiered,
            PricingModelType::Volume => &self.volume,
            PricingModelType::StairStep => &self.stair_step,
            PricingModelType::Usage => &self.usage,
        }
    }

    /// Strategy owning a payload
    pub fn for_payload(&self, payload: &PricingPayload) -> &dyn PricingModelStrategy {
        self.get(payload.model_type())
    }
}

impl Default for PricingStrategies {
    fn default() -> Self {
        Self::new(&WizardConfig::default())
    }
}
