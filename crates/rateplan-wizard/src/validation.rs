//! Validation Engine
//!
//! Pure per-step rules over a draft. Only blocking diagnostics stop the
//! wizard from advancing; warnings are informational.

use rateplan_common::WizardConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::model::{RatePlanDraft, StepState, WizardStep};
use crate::pricing::PricingStrategies;

/// Field-scoped validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Field path, e.g. `tiers[1].to`
    pub field: String,
    /// Operator-facing message
    pub message: String,
    /// Prevents advancing when set
    pub blocking: bool,
}

impl Diagnostic {
    /// Finding that prevents advancing
    pub fn blocking(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            blocking: true,
        }
    }

    /// Informational finding
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            blocking: false,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Whether any diagnostic blocks
pub fn has_blocking(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.blocking)
}

/// Per-step rule evaluator
pub struct ValidationEngine {
    strategies: Arc<PricingStrategies>,
    catalog: Arc<Catalog>,
    currency_symbol: String,
}

impl ValidationEngine {
    /// Engine over the given strategies and catalog
    pub fn new(config: &WizardConfig, strategies: Arc<PricingStrategies>, catalog: Arc<Catalog>) -> Self {
        Self {
            strategies,
            catalog,
            currency_symbol: config.currency_symbol.clone(),
        }
    }

    /// Diagnostics for one step of a draft
    pub fn evaluate(&self, step: WizardStep, draft: &RatePlanDraft) -> Vec<Diagnostic> {
        match step {
            WizardStep::Details => self.details(draft),
            WizardStep::BillableMetrics => self.billable_metrics(draft),
            WizardStep::PricingModel => self.pricing_model(draft),
            WizardStep::Extras => draft.extras().diagnostics(&self.currency_symbol),
            WizardStep::Review => self.review(draft),
        }
    }

    fn details(&self, draft: &RatePlanDraft) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let required = [
            ("ratePlanName", "rate plan name", draft.rate_plan_name()),
            ("productReference", "product", draft.product_reference()),
            ("description", "description", draft.description()),
            ("billingFrequency", "billing frequency", draft.billing_frequency()),
        ];
        for (field, label, value) in required {
            if value.trim().is_empty() {
                out.push(Diagnostic::blocking(field, format!("{} is required", label)));
            }
        }
        if draft.pricing_model_type().is_none() {
            out.push(Diagnostic::blocking("pricingModelType", "pricing model is required"));
        }

        let product = draft.product_reference().trim();
        if !product.is_empty() && !self.catalog.is_empty() && self.catalog.find_product(product).is_none() {
            out.push(Diagnostic::warning("productReference", "product is not in the catalog"));
        }
        out
    }

    fn billable_metrics(&self, draft: &RatePlanDraft) -> Vec<Diagnostic> {
        let Some(metric_id) = draft.billable_metric() else {
            return Vec::new();
        };
        if self.catalog.metrics().is_empty() {
            return Vec::new();
        }

        match self.catalog.find_metric(metric_id) {
            None => vec![Diagnostic::warning("billableMetric", "metric is not in the catalog")],
            Some(metric) => {
                let owner = self.catalog.find_product(draft.product_reference()).map(|p| p.id.as_str());
                match (&metric.product_id, owner) {
                    (Some(metric_owner), Some(product)) if metric_owner != product => vec![Diagnostic::warning(
                        "billableMetric",
                        "metric belongs to a different product",
                    )],
                    _ => Vec::new(),
                }
            }
        }
    }

    fn pricing_model(&self, draft: &RatePlanDraft) -> Vec<Diagnostic> {
        match draft.pricing() {
            Some(payload) => self.strategies.for_payload(payload).compute_is_valid(payload),
            None => vec![Diagnostic::blocking("pricingModelType", "pricing model is required")],
        }
    }

    /// Final gate: every earlier step must be saved and still valid
    fn review(&self, draft: &RatePlanDraft) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for step in WizardStep::ALL.iter().copied().filter(|s| !s.is_terminal()) {
            if draft.step_state(step) != StepState::Saved {
                out.push(Diagnostic::blocking(step.as_str(), "step has unsaved changes"));
            }
            out.extend(self.evaluate(step, draft).into_iter().filter(|d| d.blocking));
        }
        out
    }
}
