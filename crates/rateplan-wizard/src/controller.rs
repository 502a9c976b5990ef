//! Wizard Controller - step state machine over one draft
//!
//! Owns the session for one editing session. `advance()` is the only
//! suspending operation; while its save is in flight every navigation and
//! edit call is refused with [`WizardError::Busy`], so at most one save per
//! draft is ever outstanding and step N settles before step N+1 is sent.

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rateplan_common::{RatePlanId, WizardConfig};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::gateway::{
    DetailsPayload, IdempotencyKey, PersistError, PersistenceGateway, SaveRequest, StepPayload,
    TimeoutGateway,
};
use crate::model::{RatePlanDraft, StepState, WizardSession, WizardStep};
use crate::pricing::{PricingModelType, PricingPayload, PricingStrategies};
use crate::tiers::{Tier, TierField, TierList};
use crate::validation::{has_blocking, Diagnostic, ValidationEngine};
use crate::{WizardError, WizardResult};

/// Result of a successful `advance()`
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Step saved, next step active
    Advanced {
        /// Step that was saved
        from: WizardStep,
        /// Step now active
        to: WizardStep,
    },
    /// Review saved, draft committed
    Committed {
        /// ID of the committed plan
        rate_plan_id: RatePlanId,
        /// Commit time reported by the store
        committed_at: chrono::DateTime<Utc>,
    },
}

/// What to do with unsaved edits when the draft is replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardDecision {
    /// Refuse the replacement if anything is unsaved
    Keep,
    /// Drop unsaved edits
    Discard,
}

/// Clears the in-flight flag when `advance()` settles or its future is dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Rate plan wizard
pub struct WizardController {
    session: Mutex<WizardSession>,
    gateway: Arc<dyn PersistenceGateway>,
    strategies: Arc<PricingStrategies>,
    validator: ValidationEngine,
    config: WizardConfig,
    in_flight: AtomicBool,
}

impl WizardController {
    /// Open the wizard on a fresh draft
    pub fn new<G>(config: WizardConfig, gateway: G, catalog: Arc<Catalog>) -> WizardResult<Self>
    where
        G: PersistenceGateway + 'static,
    {
        Self::with_draft(config, gateway, catalog, RatePlanDraft::new())
    }

    /// Open the wizard on an existing draft
    pub fn with_draft<G>(
        config: WizardConfig,
        gateway: G,
        catalog: Arc<Catalog>,
        draft: RatePlanDraft,
    ) -> WizardResult<Self>
    where
        G: PersistenceGateway + 'static,
    {
        config.validate()?;

        let gateway: Arc<dyn PersistenceGateway> = match config.save_timeout() {
            Some(timeout) => Arc::new(TimeoutGateway::new(gateway, timeout)),
            None => Arc::new(gateway),
        };
        let strategies = Arc::new(PricingStrategies::new(&config));
        let validator = ValidationEngine::new(&config, strategies.clone(), catalog);

        Ok(Self {
            session: Mutex::new(WizardSession::new(draft)),
            gateway,
            strategies,
            validator,
            config,
            in_flight: AtomicBool::new(false),
        })
    }

    // === Read access ===

    /// Snapshot of the session
    pub fn session(&self) -> WizardSession {
        self.session.lock().clone()
    }

    /// Snapshot of the draft
    pub fn draft(&self) -> RatePlanDraft {
        self.session.lock().draft.clone()
    }

    /// Step the operator is on
    pub fn active_step(&self) -> WizardStep {
        self.session.lock().active_step
    }

    /// Persistence state of `step`
    pub fn step_state(&self, step: WizardStep) -> StepState {
        self.session.lock().draft.step_state(step)
    }

    /// Diagnostics from the last `advance()` on the active step
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.session.lock().diagnostics.clone()
    }

    /// A save is in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Review has committed the draft
    pub fn is_committed(&self) -> bool {
        self.session.lock().is_committed()
    }

    /// Validated configuration
    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    /// Pricing strategy registry, for previews
    pub fn strategies(&self) -> &PricingStrategies {
        &self.strategies
    }

    /// Evaluate any step without touching the session
    pub fn evaluate(&self, step: WizardStep) -> Vec<Diagnostic> {
        let session = self.session.lock();
        self.validator.evaluate(step, &session.draft)
    }

    /// Charge for `units` under the current pricing payload
    pub fn estimate(&self, units: u64) -> Option<Decimal> {
        let session = self.session.lock();
        let payload = session.draft.pricing()?;
        self.strategies.for_payload(payload).estimate(payload, units)
    }

    // === Editing ===

    /// Apply an edit to the draft.
    ///
    /// Switching the pricing model inside `f` also drops the diagnostics
    /// collected for the previous model.
    pub fn edit<R>(&self, f: impl FnOnce(&mut RatePlanDraft) -> R) -> WizardResult<R> {
        let mut session = self.lock_editable()?;
        let model = session.draft.pricing_model_type();
        let out = f(&mut session.draft);
        if session.draft.pricing_model_type() != model {
            session.diagnostics.clear();
        }
        Ok(out)
    }

    /// Select the pricing model; a different model resets the payload
    pub fn select_pricing_model(&self, model: PricingModelType) -> WizardResult<Option<PricingPayload>> {
        let previous = self.edit(|draft| draft.select_pricing_model(model, &self.strategies))?;
        if let Some(previous) = &previous {
            tracing::debug!(from = %previous.model_type(), to = %model, "pricing model switched");
        }
        Ok(previous)
    }

    /// Append a tier after the last one; returns its index
    pub fn add_tier(&self) -> WizardResult<usize> {
        self.edit_tiers(TierList::add_tier)
    }

    /// Remove the tier at `index`; the last remaining tier cannot be removed
    pub fn remove_tier(&self, index: usize) -> WizardResult<Tier> {
        self.edit_tiers(|tiers| tiers.remove_tier(index))
    }

    /// Set one tier cell from raw operator input
    pub fn update_tier(&self, index: usize, field: TierField, raw: &str) -> WizardResult<()> {
        self.edit_tiers(|tiers| tiers.update_tier(index, field, raw))
    }

    /// Toggle the open-ended last tier
    pub fn set_no_upper_limit(&self, enabled: bool) -> WizardResult<()> {
        self.edit_tiers(|tiers| {
            tiers.set_no_upper_limit(enabled);
            Ok(())
        })
    }

    /// Run a tier operation; a rejected operation leaves the draft untouched
    fn edit_tiers<R>(&self, f: impl FnOnce(&mut TierList) -> Result<R, Diagnostic>) -> WizardResult<R> {
        let mut session = self.lock_editable()?;
        let Some(mut tiers) = session.draft.pricing().and_then(PricingPayload::tiers).cloned() else {
            return Err(WizardError::Validation {
                step: WizardStep::PricingModel,
                diagnostics: vec![Diagnostic::blocking(
                    "pricingModelType",
                    "active pricing model has no tiers",
                )],
            });
        };

        let out = f(&mut tiers).map_err(|diagnostic| WizardError::Validation {
            step: WizardStep::PricingModel,
            diagnostics: vec![diagnostic],
        })?;
        if let Some(slot) = session.draft.tiers_mut() {
            *slot = tiers;
        }
        Ok(out)
    }

    /// Swap in another draft, returning the previous one.
    ///
    /// With [`DiscardDecision::Keep`] a draft with unsaved edits is not
    /// replaced.
    pub fn replace_draft(&self, draft: RatePlanDraft, decision: DiscardDecision) -> WizardResult<RatePlanDraft> {
        let mut session = self.lock_idle()?;
        if decision == DiscardDecision::Keep && session.draft.has_unsaved_changes() {
            return Err(WizardError::UnsavedChanges);
        }

        let previous = std::mem::replace(&mut *session, WizardSession::new(draft));
        tracing::info!(
            rate_plan_id = ?previous.draft.rate_plan_id().map(RatePlanId::as_str),
            discarded = previous.draft.has_unsaved_changes(),
            "draft replaced"
        );
        Ok(previous.draft)
    }

    /// Abandon the session. Saved steps stay saved remotely.
    pub fn cancel(self) {
        let session = self.session.into_inner();
        tracing::info!(
            rate_plan_id = ?session.draft.rate_plan_id().map(RatePlanId::as_str),
            step = %session.active_step,
            committed = session.is_committed(),
            "wizard cancelled"
        );
    }

    // === Navigation ===

    /// Move one step back without validating or saving
    pub fn retreat(&self) -> WizardResult<WizardStep> {
        let mut session = self.lock_idle()?;
        if let Some(previous) = session.active_step.previous() {
            session.active_step = previous;
            session.diagnostics.clear();
        }
        tracing::debug!(step = %session.active_step, "retreated");
        Ok(session.active_step)
    }

    /// Jump to the active step or any step up to the highest saved one
    pub fn jump_to(&self, target: WizardStep) -> WizardResult<()> {
        let mut session = self.lock_idle()?;
        if !session.can_jump_to(target) {
            tracing::debug!(to = %target, highest_saved = ?session.highest_saved(), "jump denied");
            return Err(WizardError::NavigationDenied { target });
        }
        if session.active_step != target {
            session.active_step = target;
            session.diagnostics.clear();
        }
        tracing::debug!(step = %target, "jumped");
        Ok(())
    }

    /// Validate and save the active step, then move forward.
    ///
    /// On Review a successful save commits the draft. A failed save marks
    /// the step `Failed` and keeps everything entered, so calling again
    /// resubmits the identical payload under the same idempotency key.
    pub async fn advance(&self) -> WizardResult<AdvanceOutcome> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(WizardError::Busy)?;

        let request = {
            let mut session = self.session.lock();
            if session.is_committed() {
                return Err(WizardError::Committed);
            }

            let step = session.active_step;
            let mut diagnostics = self.validator.evaluate(step, &session.draft);
            // Steps after Details are only sent once the stored details,
            // pricing model type included, match the draft.
            if step != WizardStep::Details
                && !step.is_terminal()
                && session.draft.step_state(WizardStep::Details) != StepState::Saved
            {
                diagnostics.push(Diagnostic::blocking(
                    WizardStep::Details.as_str(),
                    "details have unsaved changes; save that step first",
                ));
            }
            session.diagnostics = diagnostics.clone();
            if has_blocking(&diagnostics) {
                tracing::debug!(
                    step = %step,
                    blocking = diagnostics.iter().filter(|d| d.blocking).count(),
                    "advance blocked by validation"
                );
                return Err(WizardError::Validation { step, diagnostics });
            }

            self.build_request(step, &session.draft).map_err(|msg| {
                tracing::error!(step = %step, error = %msg, "refusing to save");
                WizardError::FatalState(msg)
            })?
        };

        let step = request.step;
        let key = request.key.to_string();
        let result = self.gateway.save(request).await;

        let mut session = self.session.lock();
        match result {
            Ok(fields) => {
                session.draft.merge_server_fields(&fields);
                session.draft.set_step_state(step, StepState::Saved);
                session.diagnostics.clear();
                tracing::info!(step = %step, key = %key, "step saved");

                match step.next() {
                    Some(next) => {
                        session.active_step = next;
                        Ok(AdvanceOutcome::Advanced { from: step, to: next })
                    }
                    None => {
                        let rate_plan_id = session.draft.rate_plan_id().cloned().ok_or_else(|| {
                            tracing::error!(step = %step, "committed without a rate plan ID");
                            WizardError::FatalState("committed without a rate plan ID".into())
                        })?;
                        let committed_at = Utc::now();
                        session.committed_at = Some(committed_at);
                        tracing::info!(rate_plan_id = %rate_plan_id, "rate plan committed");
                        Ok(AdvanceOutcome::Committed { rate_plan_id, committed_at })
                    }
                }
            }
            Err(err) => {
                session.draft.set_step_state(step, StepState::Failed);
                match &err {
                    PersistError::FatalState(msg) => {
                        tracing::error!(step = %step, key = %key, error = %msg, "save failed with fatal state")
                    }
                    PersistError::Transient(msg) => {
                        tracing::warn!(step = %step, key = %key, error = %msg, "save failed, retryable")
                    }
                    PersistError::Rejected { field, message } => {
                        tracing::warn!(step = %step, key = %key, field = ?field, error = %message, "save rejected")
                    }
                }
                Err(err.into())
            }
        }
    }

    fn build_request(&self, step: WizardStep, draft: &RatePlanDraft) -> Result<SaveRequest, String> {
        let key = match (draft.rate_plan_id(), step) {
            (Some(id), _) => IdempotencyKey::Plan {
                rate_plan_id: id.clone(),
                step,
            },
            (None, WizardStep::Details) => IdempotencyKey::Correlation(draft.correlation()),
            (None, _) => return Err(format!("{} cannot be saved before the rate plan has an ID", step)),
        };

        let payload = match step {
            WizardStep::Details => {
                let pricing_model_type = draft
                    .pricing_model_type()
                    .ok_or_else(|| "details saved without a pricing model".to_string())?;
                StepPayload::Details(DetailsPayload {
                    rate_plan_name: draft.rate_plan_name().trim().to_string(),
                    product_reference: draft.product_reference().trim().to_string(),
                    description: draft.description().trim().to_string(),
                    billing_frequency: draft.billing_frequency().trim().to_string(),
                    pricing_model_type,
                })
            }
            WizardStep::BillableMetrics => StepPayload::BillableMetrics {
                billable_metric: draft.billable_metric().map(str::to_string),
            },
            WizardStep::PricingModel => {
                let payload = draft
                    .pricing()
                    .ok_or_else(|| "pricing saved without a pricing model".to_string())?;
                let normalized = self
                    .strategies
                    .for_payload(payload)
                    .to_persistence_payload(payload)
                    .map_err(|e| e.to_string())?;
                StepPayload::PricingModel(normalized)
            }
            WizardStep::Extras => StepPayload::Extras(draft.extras().normalize(&self.config.currency_symbol)),
            WizardStep::Review => StepPayload::Review,
        };

        Ok(SaveRequest { step, key, payload })
    }

    fn lock_idle(&self) -> WizardResult<MutexGuard<'_, WizardSession>> {
        let session = self.session.lock();
        if self.is_busy() {
            return Err(WizardError::Busy);
        }
        Ok(session)
    }

    fn lock_editable(&self) -> WizardResult<MutexGuard<'_, WizardSession>> {
        let session = self.lock_idle()?;
        if session.is_committed() {
            return Err(WizardError::Committed);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryGateway, PersistResult, ServerFields};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    /// In-memory store with scripted failures and an optional hold point
    #[derive(Default)]
    struct ScriptedGateway {
        inner: InMemoryGateway,
        calls: parking_lot::Mutex<Vec<SaveRequest>>,
        failures: parking_lot::Mutex<VecDeque<PersistError>>,
        hold: bool,
        started: Notify,
        release: Notify,
    }

    impl ScriptedGateway {
        fn holding() -> Self {
            Self { hold: true, ..Default::default() }
        }

        fn fail_next(&self, err: PersistError) {
            self.failures.lock().push_back(err);
        }

        fn calls(&self) -> Vec<SaveRequest> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl PersistenceGateway for ScriptedGateway {
        async fn save(&self, request: SaveRequest) -> PersistResult<ServerFields> {
            self.calls.lock().push(request.clone());
            if self.hold {
                self.started.notify_one();
                self.release.notified().await;
            }
            let failure = self.failures.lock().pop_front();
            match failure {
                Some(err) => Err(err),
                None => self.inner.save(request).await,
            }
        }
    }

    fn config() -> WizardConfig {
        WizardConfig {
            save_timeout_ms: None,
            ..Default::default()
        }
    }

    fn controller(gateway: Arc<ScriptedGateway>) -> WizardController {
        WizardController::new(config(), gateway, Arc::new(Catalog::default())).unwrap()
    }

    fn fill_details(controller: &WizardController, name: &str, model: PricingModelType) {
        controller
            .edit(|draft| {
                draft.set_rate_plan_name(name);
                draft.set_product_reference("prod-1");
                draft.set_description("Pay as you go");
                draft.set_billing_frequency("monthly");
            })
            .unwrap();
        controller.select_pricing_model(model).unwrap();
    }

    fn set_per_unit(controller: &WizardController, amount: &str) {
        controller
            .edit(|draft| {
                if let Some(usage) = draft.usage_mut() {
                    usage.per_unit_amount = amount.into();
                }
            })
            .unwrap();
    }

    /// Details and billable metrics saved, pricing step active
    async fn at_pricing_step(controller: &WizardController) {
        fill_details(controller, "Metered", PricingModelType::Usage);
        controller.advance().await.unwrap();
        controller.advance().await.unwrap();
        assert_eq!(controller.active_step(), WizardStep::PricingModel);
    }

    #[tokio::test]
    async fn test_blank_name_blocks_advance() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway.clone());
        fill_details(&controller, "", PricingModelType::FlatFee);

        let err = controller.advance().await.unwrap_err();
        match err {
            WizardError::Validation { step, diagnostics } => {
                assert_eq!(step, WizardStep::Details);
                assert!(diagnostics.iter().any(|d| d.field == "ratePlanName" && d.blocking));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(controller.active_step(), WizardStep::Details);
        assert_eq!(controller.step_state(WizardStep::Details), StepState::InProgress);
        assert!(!controller.diagnostics().is_empty());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_details_save_mints_id_and_merges_server_fields() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway.clone());
        fill_details(&controller, "Metered", PricingModelType::Usage);

        let outcome = controller.advance().await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced { from: WizardStep::Details, to: WizardStep::BillableMetrics }
        );

        let draft = controller.draft();
        assert!(draft.rate_plan_id().is_some());
        assert_eq!(draft.billing_frequency(), "MONTHLY");
        assert_eq!(draft.step_state(WizardStep::Details), StepState::Saved);
        assert!(matches!(gateway.calls()[0].key, IdempotencyKey::Correlation(_)));
    }

    #[tokio::test]
    async fn test_transient_failure_then_retry() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway.clone());
        at_pricing_step(&controller).await;
        set_per_unit(&controller, "$0.05");

        gateway.fail_next(PersistError::Transient("connection reset".into()));
        let before = controller.draft();
        let err = controller.advance().await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(controller.active_step(), WizardStep::PricingModel);
        assert_eq!(controller.draft().pricing(), before.pricing());
        assert_eq!(controller.step_state(WizardStep::PricingModel), StepState::Failed);

        let outcome = controller.advance().await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced { from: WizardStep::PricingModel, to: WizardStep::Extras }
        );
        assert_eq!(controller.step_state(WizardStep::PricingModel), StepState::Saved);

        let calls = gateway.calls();
        let (failed, retried) = (&calls[calls.len() - 2], &calls[calls.len() - 1]);
        assert_eq!(failed, retried);
        assert!(matches!(retried.key, IdempotencyKey::Plan { step: WizardStep::PricingModel, .. }));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retryable() {
        init_tracing();
        let store = Arc::new(InMemoryGateway::new());
        let first = WizardController::new(config(), store.clone(), Arc::new(Catalog::default())).unwrap();
        let second = WizardController::new(config(), store.clone(), Arc::new(Catalog::default())).unwrap();

        for controller in [&first, &second] {
            controller
                .edit(|draft| {
                    draft.set_rate_plan_name("Starter");
                    draft.set_product_reference("prod-1");
                    draft.set_description("Entry plan");
                    draft.set_billing_frequency("monthly");
                })
                .unwrap();
            controller.select_pricing_model(PricingModelType::FlatFee).unwrap();
        }

        first.advance().await.unwrap();
        let err = second.advance().await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::Persist(PersistError::Rejected { field: Some(ref f), .. }) if f == "ratePlanName"
        ));
        assert!(!err.is_retryable());
        assert_eq!(second.step_state(WizardStep::Details), StepState::Failed);
        assert!(second.draft().rate_plan_id().is_none());

        second.edit(|draft| draft.set_rate_plan_name("Starter Plus")).unwrap();
        second.advance().await.unwrap();
        assert_eq!(store.plan_count(), 2);
    }

    #[tokio::test]
    async fn test_advance_is_exclusive_while_saving() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::holding());
        let controller = controller(gateway.clone());
        fill_details(&controller, "Metered", PricingModelType::Usage);

        let (first, refused) = tokio::join!(controller.advance(), async {
            gateway.started.notified().await;
            assert!(controller.is_busy());
            let refused = (
                controller.advance().await.map(|_| ()),
                controller.retreat().map(|_| ()),
                controller.jump_to(WizardStep::Details),
                controller.edit(|draft| draft.set_description("changed")),
            );
            gateway.release.notify_one();
            refused
        });

        assert!(first.is_ok());
        assert!(matches!(refused.0, Err(WizardError::Busy)));
        assert!(matches!(refused.1, Err(WizardError::Busy)));
        assert!(matches!(refused.2, Err(WizardError::Busy)));
        assert!(matches!(refused.3, Err(WizardError::Busy)));
        assert_eq!(gateway.calls().len(), 1);
        assert!(!controller.is_busy());
        assert_eq!(controller.draft().description(), "Pay as you go");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_marks_step_failed() {
        init_tracing();
        let config = WizardConfig {
            save_timeout_ms: Some(50),
            ..Default::default()
        };
        let gateway = Arc::new(ScriptedGateway::holding());
        let controller = WizardController::new(config, gateway.clone(), Arc::new(Catalog::default())).unwrap();
        fill_details(&controller, "Metered", PricingModelType::Usage);

        let err = controller.advance().await.unwrap_err();
        assert!(matches!(err, WizardError::Persist(PersistError::Transient(_))));
        assert_eq!(controller.step_state(WizardStep::Details), StepState::Failed);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_missing_id_is_fatal_and_never_sent() {
        init_tracing();
        let mut draft = RatePlanDraft::new();
        draft.set_step_state(WizardStep::Details, StepState::Saved);
        draft.set_step_state(WizardStep::BillableMetrics, StepState::Saved);

        let gateway = Arc::new(ScriptedGateway::default());
        let controller =
            WizardController::with_draft(config(), gateway.clone(), Arc::new(Catalog::default()), draft).unwrap();
        controller.jump_to(WizardStep::BillableMetrics).unwrap();

        let err = controller.advance().await.unwrap_err();
        assert!(matches!(err, WizardError::FatalState(_)));
        assert!(gateway.calls().is_empty());
        assert_eq!(controller.step_state(WizardStep::BillableMetrics), StepState::Saved);
        assert_eq!(controller.active_step(), WizardStep::BillableMetrics);
    }

    #[tokio::test]
    async fn test_navigation_keeps_entered_values() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway.clone());
        at_pricing_step(&controller).await;
        set_per_unit(&controller, "0.07");

        assert_eq!(controller.retreat().unwrap(), WizardStep::BillableMetrics);
        assert_eq!(controller.retreat().unwrap(), WizardStep::Details);
        assert_eq!(controller.retreat().unwrap(), WizardStep::Details);
        assert_eq!(controller.draft().rate_plan_name(), "Metered");

        assert!(matches!(
            controller.jump_to(WizardStep::Extras),
            Err(WizardError::NavigationDenied { target: WizardStep::Extras })
        ));
        controller.jump_to(WizardStep::BillableMetrics).unwrap();
        assert!(matches!(
            controller.draft().pricing(),
            Some(PricingPayload::Usage(usage)) if usage.per_unit_amount == "0.07"
        ));

        controller.jump_to(WizardStep::Details).unwrap();
        controller.edit(|draft| draft.set_description("Revised")).unwrap();
        controller.advance().await.unwrap();
        let resave = gateway.calls().pop().unwrap();
        assert!(matches!(resave.key, IdempotencyKey::Plan { step: WizardStep::Details, .. }));
    }

    #[tokio::test]
    async fn test_model_switch_resets_payload_and_diagnostics() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway);
        at_pricing_step(&controller).await;

        assert!(controller.advance().await.is_err());
        assert!(!controller.diagnostics().is_empty());

        let previous = controller.select_pricing_model(PricingModelType::Volume).unwrap();
        assert!(matches!(previous, Some(PricingPayload::Usage(_))));
        assert!(controller.diagnostics().is_empty());
        assert_eq!(
            controller.draft().pricing(),
            Some(&controller.strategies().get(PricingModelType::Volume).default_payload())
        );
        assert_eq!(controller.step_state(WizardStep::Details), StepState::InProgress);
    }

    #[tokio::test]
    async fn test_model_switch_at_pricing_step_requires_details_resave() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway.clone());
        at_pricing_step(&controller).await;

        controller.select_pricing_model(PricingModelType::Volume).unwrap();
        controller.update_tier(0, TierField::To, "100").unwrap();
        controller.update_tier(0, TierField::Price, "0.10").unwrap();
        controller.update_tier(1, TierField::From, "101").unwrap();
        controller.update_tier(1, TierField::To, "1000").unwrap();
        controller.update_tier(1, TierField::Price, "0.08").unwrap();
        controller.remove_tier(2).unwrap();
        assert!(controller.evaluate(WizardStep::PricingModel).is_empty());

        let sent = gateway.calls().len();
        let err = controller.advance().await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::Validation { step: WizardStep::PricingModel, ref diagnostics }
                if diagnostics.iter().any(|d| d.field == "details" && d.blocking)
        ));
        assert_eq!(gateway.calls().len(), sent);
        assert_eq!(controller.step_state(WizardStep::PricingModel), StepState::InProgress);
        assert_eq!(controller.active_step(), WizardStep::PricingModel);

        controller.jump_to(WizardStep::Details).unwrap();
        controller.advance().await.unwrap();
        controller.advance().await.unwrap();
        assert_eq!(
            controller.advance().await.unwrap(),
            AdvanceOutcome::Advanced { from: WizardStep::PricingModel, to: WizardStep::Extras }
        );
        assert!(matches!(
            gateway.calls().last().map(|call| &call.payload),
            Some(StepPayload::PricingModel(pricing)) if pricing.model_type() == PricingModelType::Volume
        ));
    }

    #[tokio::test]
    async fn test_tier_operations() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway);
        fill_details(&controller, "Bulk", PricingModelType::Volume);

        controller.remove_tier(2).unwrap();
        controller.remove_tier(1).unwrap();
        let err = controller.remove_tier(0).unwrap_err();
        match err {
            WizardError::Validation { diagnostics, .. } => {
                assert_eq!(diagnostics[0].message, "cannot remove last tier");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        let tiers = controller.draft().pricing().and_then(PricingPayload::tiers).cloned().unwrap();
        assert_eq!(tiers.len(), 1);

        controller.update_tier(0, TierField::To, "100").unwrap();
        controller.update_tier(0, TierField::Price, "0.10").unwrap();
        assert_eq!(controller.add_tier().unwrap(), 1);
        controller.update_tier(1, TierField::Price, "0.08").unwrap();
        controller.set_no_upper_limit(true).unwrap();
        assert!(controller.add_tier().is_err());
        assert!(controller.evaluate(WizardStep::PricingModel).is_empty());
        assert!(controller.estimate(50).is_some());

        controller.select_pricing_model(PricingModelType::FlatFee).unwrap();
        assert!(matches!(controller.add_tier(), Err(WizardError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_full_walk_commits() {
        init_tracing();
        let store = Arc::new(InMemoryGateway::new());
        let controller = WizardController::new(config(), store.clone(), Arc::new(Catalog::default())).unwrap();
        fill_details(&controller, "Metered", PricingModelType::Usage);

        controller.advance().await.unwrap();
        controller.edit(|draft| draft.set_billable_metric(Some("m-calls".into()))).unwrap();
        controller.advance().await.unwrap();
        set_per_unit(&controller, "$0.05");
        controller.advance().await.unwrap();
        controller
            .edit(|draft| {
                let extras = draft.extras_mut();
                extras.setup_fee = "25".into();
                extras.free_units = "1,000".into();
            })
            .unwrap();
        assert_eq!(
            controller.advance().await.unwrap(),
            AdvanceOutcome::Advanced { from: WizardStep::Extras, to: WizardStep::Review }
        );
        assert_eq!(controller.estimate(200), Some(dec!(10)));

        let outcome = controller.advance().await.unwrap();
        let AdvanceOutcome::Committed { rate_plan_id, .. } = outcome else {
            panic!("expected commit, got {:?}", outcome);
        };
        assert!(controller.is_committed());

        let stored = store.plan(&rate_plan_id).unwrap();
        assert!(stored.committed.is_some());
        assert_eq!(stored.billable_metric.as_deref(), Some("m-calls"));
        assert_eq!(stored.extras.unwrap().free_units, Some(1000));

        assert!(matches!(controller.advance().await, Err(WizardError::Committed)));
        assert!(matches!(
            controller.edit(|draft| draft.set_description("late")),
            Err(WizardError::Committed)
        ));
        controller.cancel();
    }

    #[tokio::test]
    async fn test_review_blocks_on_unsaved_step() {
        init_tracing();
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway);
        at_pricing_step(&controller).await;
        set_per_unit(&controller, "$0.05");
        controller.advance().await.unwrap();
        controller.advance().await.unwrap();
        assert_eq!(controller.active_step(), WizardStep::Review);

        controller.edit(|draft| draft.set_description("edited late")).unwrap();
        let err = controller.advance().await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::Validation { step: WizardStep::Review, ref diagnostics }
                if diagnostics.iter().any(|d| d.field == "details")
        ));
        assert!(!controller.is_committed());
    }

    #[test]
    fn test_replace_draft_requires_decision() {
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller(gateway);
        controller.edit(|draft| draft.set_rate_plan_name("Half done")).unwrap();

        let fresh = RatePlanDraft::new();
        assert!(matches!(
            controller.replace_draft(fresh.clone(), DiscardDecision::Keep),
            Err(WizardError::UnsavedChanges)
        ));
        assert_eq!(controller.draft().rate_plan_name(), "Half done");

        let previous = controller.replace_draft(fresh.clone(), DiscardDecision::Discard).unwrap();
        assert_eq!(previous.rate_plan_name(), "Half done");
        assert_eq!(controller.draft(), fresh);
        assert_eq!(controller.active_step(), WizardStep::Details);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WizardConfig {
            default_tier_count: 0,
            ..Default::default()
        };
        let result = WizardController::new(config, InMemoryGateway::new(), Arc::new(Catalog::default()));
        assert!(matches!(result, Err(WizardError::Config(_))));
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag).unwrap();
        assert!(InFlight::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlight::acquire(&flag).is_some());
    }
}
