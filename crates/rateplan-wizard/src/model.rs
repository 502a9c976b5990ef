//! Configuration Model - the rate plan draft and its wizard session
//!
//! # Invariants
//! - `rate_plan_id` is only ever written from a server response
//! - The pricing model type is derived from the payload, so the two can
//!   never disagree
//! - Editing a step's fields moves that step out of `Saved`

use chrono::{DateTime, Utc};
use rateplan_common::{parse_money_input, CorrelationToken, RatePlanId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::gateway::ServerFields;
use crate::pricing::{FlatFeePayload, PricingModelType, PricingPayload, PricingStrategies, UsagePayload};
use crate::tiers::TierList;
use crate::validation::Diagnostic;

/// Wizard step, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    /// Name, product, frequency and pricing model type
    Details,
    /// Optional metric selection
    BillableMetrics,
    /// Payload of the selected pricing model
    PricingModel,
    /// Setup fee, discount, free units, minimum commitment
    Extras,
    /// Read-only summary; saving it commits the plan
    Review,
}

impl WizardStep {
    /// Number of steps
    pub const COUNT: usize = 5;

    /// All steps in order
    pub const ALL: [WizardStep; Self::COUNT] = [
        Self::Details,
        Self::BillableMetrics,
        Self::PricingModel,
        Self::Extras,
        Self::Review,
    ];

    /// Zero-based position
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Step at a zero-based position
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Following step, `None` after Review
    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Preceding step, `None` before Details
    pub fn previous(&self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    /// Review commits the draft instead of moving on
    pub fn is_terminal(&self) -> bool {
        *self == Self::Review
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::BillableMetrics => "billable_metrics",
            Self::PricingModel => "pricing_model",
            Self::Extras => "extras",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence state of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepState {
    /// Never edited
    #[default]
    NotStarted,
    /// Edited since the last save
    InProgress,
    /// Last save succeeded
    Saved,
    /// Last save failed
    Failed,
}

/// Additive plan options; none of them gate the wizard
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Extras {
    /// One-off fee charged on activation
    pub setup_fee: String,
    /// Percentage, 0 to 100
    pub discount_percent: String,
    /// Units included before charges start
    pub free_units: String,
    /// Minimum billed amount per period
    pub minimum_commitment: String,
}

/// Extras as sent to the store; unparseable entries are dropped
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedExtras {
    /// Canonical money string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_fee: Option<String>,
    /// Percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<Decimal>,
    /// Included units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_units: Option<u64>,
    /// Canonical money string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_commitment: Option<String>,
}

impl Extras {
    fn money(raw: &str, symbol: &str) -> Option<Option<String>> {
        if raw.trim().is_empty() {
            return Some(None);
        }
        parse_money_input(raw, symbol).ok().map(|m| Some(m.canonical()))
    }

    fn percent(raw: &str) -> Option<Option<Decimal>> {
        let trimmed = raw.trim().trim_end_matches('%').trim();
        if trimmed.is_empty() {
            return Some(None);
        }
        Decimal::from_str(trimmed)
            .ok()
            .filter(|d| *d >= Decimal::ZERO && *d <= Decimal::ONE_HUNDRED)
            .map(Some)
    }

    fn units(raw: &str) -> Option<Option<u64>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(None);
        }
        trimmed.replace(',', "").parse().ok().map(Some)
    }

    /// Non-blocking warnings for entries that will be dropped on save
    pub fn diagnostics(&self, symbol: &str) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        if Self::money(&self.setup_fee, symbol).is_none() {
            out.push(Diagnostic::warning("setupFee", "not a currency amount; it will not be saved"));
        }
        if Self::percent(&self.discount_percent).is_none() {
            out.push(Diagnostic::warning("discountPercent", "must be a percentage between 0 and 100"));
        }
        if Self::units(&self.free_units).is_none() {
            out.push(Diagnostic::warning("freeUnits", "must be a whole number"));
        }
        if Self::money(&self.minimum_commitment, symbol).is_none() {
            out.push(Diagnostic::warning("minimumCommitment", "not a currency amount; it will not be saved"));
        }
        out
    }

    /// Normalized form sent to the store
    pub fn normalize(&self, symbol: &str) -> NormalizedExtras {
        NormalizedExtras {
            setup_fee: Self::money(&self.setup_fee, symbol).flatten(),
            discount_percent: Self::percent(&self.discount_percent).flatten(),
            free_units: Self::units(&self.free_units).flatten(),
            minimum_commitment: Self::money(&self.minimum_commitment, symbol).flatten(),
        }
    }
}

/// Rate plan being configured (Aggregate Root)
///
/// Created without an ID when the wizard opens; the Details save mints
/// one. Field edits go through setters so step states stay truthful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePlanDraft {
    rate_plan_id: Option<RatePlanId>,
    correlation: CorrelationToken,
    rate_plan_name: String,
    product_reference: String,
    description: String,
    billing_frequency: String,
    pricing: Option<PricingPayload>,
    billable_metric: Option<String>,
    extras: Extras,
    step_states: [StepState; WizardStep::COUNT],
}

impl RatePlanDraft {
    /// Fresh transient draft
    pub fn new() -> Self {
        Self {
            rate_plan_id: None,
            correlation: CorrelationToken::generate(),
            rate_plan_name: String::new(),
            product_reference: String::new(),
            description: String::new(),
            billing_frequency: String::new(),
            pricing: None,
            billable_metric: None,
            extras: Extras::default(),
            step_states: [StepState::NotStarted; WizardStep::COUNT],
        }
    }

    /// ID minted by the store on the first Details save
    pub fn rate_plan_id(&self) -> Option<&RatePlanId> {
        self.rate_plan_id.as_ref()
    }

    /// Key for saves issued before an ID exists
    pub fn correlation(&self) -> CorrelationToken {
        self.correlation
    }

    /// Plan name
    pub fn rate_plan_name(&self) -> &str {
        &self.rate_plan_name
    }

    /// Product ID or name
    pub fn product_reference(&self) -> &str {
        &self.product_reference
    }

    /// Free text description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Billing frequency
    pub fn billing_frequency(&self) -> &str {
        &self.billing_frequency
    }

    /// Selected model, if any
    pub fn pricing_model_type(&self) -> Option<PricingModelType> {
        self.pricing.as_ref().map(PricingPayload::model_type)
    }

    /// Payload of the selected model
    pub fn pricing(&self) -> Option<&PricingPayload> {
        self.pricing.as_ref()
    }

    /// Selected metric, if any
    pub fn billable_metric(&self) -> Option<&str> {
        self.billable_metric.as_deref()
    }

    /// Extras as entered
    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    /// Persistence state of `step`
    pub fn step_state(&self, step: WizardStep) -> StepState {
        self.step_states[step.index()]
    }

    /// States of all steps, in step order
    pub fn step_states(&self) -> &[StepState; WizardStep::COUNT] {
        &self.step_states
    }

    /// Any step edited or failed since its last successful save
    pub fn has_unsaved_changes(&self) -> bool {
        self.step_states
            .iter()
            .any(|s| matches!(s, StepState::InProgress | StepState::Failed))
    }

    /// Edits Details
    pub fn set_rate_plan_name(&mut self, value: impl Into<String>) {
        self.rate_plan_name = value.into();
        self.touch(WizardStep::Details);
    }

    /// Edits Details
    pub fn set_product_reference(&mut self, value: impl Into<String>) {
        self.product_reference = value.into();
        self.touch(WizardStep::Details);
    }

    /// Edits Details
    pub fn set_description(&mut self, value: impl Into<String>) {
        self.description = value.into();
        self.touch(WizardStep::Details);
    }

    /// Edits Details
    pub fn set_billing_frequency(&mut self, value: impl Into<String>) {
        self.billing_frequency = value.into();
        self.touch(WizardStep::Details);
    }

    /// Select the pricing model.
    ///
    /// Choosing a different model discards the current payload and installs
    /// the new model's default; the discarded payload is returned. Choosing
    /// the active model again is a no-op.
    pub fn select_pricing_model(
        &mut self,
        model: PricingModelType,
        strategies: &PricingStrategies,
    ) -> Option<PricingPayload> {
        if self.pricing_model_type() == Some(model) {
            return None;
        }

        let previous = self.pricing.replace(strategies.get(model).default_payload());
        self.touch(WizardStep::Details);
        if previous.is_some() {
            self.step_states[WizardStep::PricingModel.index()] = StepState::NotStarted;
        }
        previous
    }

    // The payload variant only ever changes through `select_pricing_model`,
    // so editors hand out the inner data and never the payload itself.

    /// Flat fee fields, when flat fee is the active model
    pub fn flat_fee_mut(&mut self) -> Option<&mut FlatFeePayload> {
        if !matches!(self.pricing, Some(PricingPayload::FlatFee(_))) {
            return None;
        }
        self.touch(WizardStep::PricingModel);
        match self.pricing.as_mut() {
            Some(PricingPayload::FlatFee(flat)) => Some(flat),
            _ => None,
        }
    }

    /// Usage fields, when usage is the active model
    pub fn usage_mut(&mut self) -> Option<&mut UsagePayload> {
        if !matches!(self.pricing, Some(PricingPayload::Usage(_))) {
            return None;
        }
        self.touch(WizardStep::PricingModel);
        match self.pricing.as_mut() {
            Some(PricingPayload::Usage(usage)) => Some(usage),
            _ => None,
        }
    }

    /// Tier list of a range-priced model for editing
    pub fn tiers_mut(&mut self) -> Option<&mut TierList> {
        self.pricing.as_ref()?.tiers()?;
        self.touch(WizardStep::PricingModel);
        self.pricing.as_mut().and_then(PricingPayload::tiers_mut)
    }

    /// Select a metric; blank clears it
    pub fn set_billable_metric(&mut self, metric: Option<String>) {
        self.billable_metric = metric.filter(|m| !m.trim().is_empty());
        self.touch(WizardStep::BillableMetrics);
    }

    /// Editable extras; marks the Extras step edited
    pub fn extras_mut(&mut self) -> &mut Extras {
        self.touch(WizardStep::Extras);
        &mut self.extras
    }

    pub(crate) fn set_step_state(&mut self, step: WizardStep, state: StepState) {
        self.step_states[step.index()] = state;
    }

    /// Overwrite local values with the store's authoritative ones
    pub(crate) fn merge_server_fields(&mut self, fields: &ServerFields) {
        if let Some(id) = &fields.rate_plan_id {
            self.rate_plan_id = Some(id.clone());
        }
        if let Some(name) = &fields.rate_plan_name {
            self.rate_plan_name = name.clone();
        }
        if let Some(product) = &fields.product_reference {
            self.product_reference = product.clone();
        }
        if let Some(frequency) = &fields.billing_frequency {
            self.billing_frequency = frequency.clone();
        }
        if let Some(metric) = &fields.billable_metric {
            self.billable_metric = Some(metric.clone());
        }
    }

    fn touch(&mut self, step: WizardStep) {
        let state = &mut self.step_states[step.index()];
        if matches!(state, StepState::NotStarted | StepState::Saved) {
            *state = StepState::InProgress;
        }
    }
}

impl Default for RatePlanDraft {
    fn default() -> Self {
        Self::new()
    }
}

/// One editing session over one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardSession {
    pub(crate) draft: RatePlanDraft,
    pub(crate) active_step: WizardStep,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) committed_at: Option<DateTime<Utc>>,
}

impl WizardSession {
    /// Session positioned on Details
    pub fn new(draft: RatePlanDraft) -> Self {
        Self {
            draft,
            active_step: WizardStep::Details,
            diagnostics: Vec::new(),
            committed_at: None,
        }
    }

    /// Draft being edited
    pub fn draft(&self) -> &RatePlanDraft {
        &self.draft
    }

    /// Step the operator is on
    pub fn active_step(&self) -> WizardStep {
        self.active_step
    }

    /// Zero-based position of the active step
    pub fn active_step_index(&self) -> usize {
        self.active_step.index()
    }

    /// States of all steps
    pub fn step_states(&self) -> &[StepState; WizardStep::COUNT] {
        self.draft.step_states()
    }

    /// Diagnostics from the last evaluation of the active step
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Highest step whose state is `Saved`
    pub fn highest_saved(&self) -> Option<WizardStep> {
        WizardStep::ALL
            .iter()
            .rev()
            .find(|s| self.draft.step_state(**s) == StepState::Saved)
            .copied()
    }

    /// Jump targets: the active step or anything up to the highest saved step
    pub fn can_jump_to(&self, step: WizardStep) -> bool {
        step == self.active_step || self.highest_saved().map_or(false, |saved| step <= saved)
    }

    /// Review has been saved
    pub fn is_committed(&self) -> bool {
        self.committed_at.is_some()
    }

    /// Commit time reported by the store
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }
}
