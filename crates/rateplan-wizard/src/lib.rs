//! Rate Plan Wizard
//!
//! Walks an operator through defining a rate plan and persists each step
//! as it is completed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         WIZARD CONTROLLER                               │
//! │   Details ─► Billable Metrics ─► Pricing Model ─► Extras ─► Review      │
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐ │
//! │  │  Validation  │  │   Pricing    │  │  Tier List   │  │ Persistence │ │
//! │  │    Engine    │  │  Strategies  │  │    Editor    │  │   Gateway   │ │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └─────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  CONFIGURATION MODEL (draft)                     │   │
//! │  │   Plan details | Pricing payload (one model) | Step states       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `advance()` validates the active step, saves its normalized payload
//! through the gateway and only moves on once the save succeeds.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod controller;
pub mod gateway;
pub mod model;
pub mod pricing;
pub mod tiers;
pub mod validation;

use rateplan_common::ConfigError;
use thiserror::Error;

pub use catalog::{BillableMetric, Catalog, Product};
pub use controller::{AdvanceOutcome, DiscardDecision, WizardController};
pub use gateway::{
    CommittedRatePlan, DetailsPayload, IdempotencyKey, InMemoryGateway, PersistError, PersistResult,
    PersistenceGateway, SaveRequest, ServerFields, StepPayload, StoredPlan, TimeoutGateway,
};
pub use model::{Extras, NormalizedExtras, RatePlanDraft, StepState, WizardSession, WizardStep};
pub use pricing::{
    FlatFeePayload, NormalizedPricing, PricingError, PricingModelStrategy, PricingModelType,
    PricingPayload, PricingStrategies, UsagePayload,
};
pub use tiers::{Tier, TierBound, TierField, TierList};
pub use validation::{Diagnostic, ValidationEngine};

/// Wizard error types
#[derive(Debug, Error)]
pub enum WizardError {
    /// Active step has blocking diagnostics; nothing was sent
    #[error("{step} has {} blocking diagnostic(s)", .diagnostics.iter().filter(|d| d.blocking).count())]
    Validation {
        /// Step that was evaluated
        step: WizardStep,
        /// Every diagnostic of that step, warnings included
        diagnostics: Vec<Diagnostic>,
    },

    /// Save failed; the draft is unchanged
    #[error(transparent)]
    Persist(PersistError),

    /// Controller invariant broken
    #[error("fatal state error: {0}")]
    FatalState(String),

    /// A save is in flight
    #[error("a save is already in flight")]
    Busy,

    /// Target step is past the highest saved one
    #[error("cannot jump to {target}")]
    NavigationDenied {
        /// Requested step
        target: WizardStep,
    },

    /// Review already committed the draft
    #[error("rate plan is already committed")]
    Committed,

    /// Replacing the draft would lose edits
    #[error("draft has unsaved changes")]
    UnsavedChanges,

    /// Wizard configuration failed validation
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WizardError {
    /// Resubmitting without edits may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persist(err) => err.is_retryable(),
            Self::Busy => true,
            _ => false,
        }
    }
}

impl From<PersistError> for WizardError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::FatalState(msg) => Self::FatalState(msg),
            other => Self::Persist(other),
        }
    }
}

/// Result type for wizard operations
pub type WizardResult<T> = Result<T, WizardError>;
