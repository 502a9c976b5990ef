//! Persistence Gateway - abstraction over the remote rate plan store
//!
//! One call per wizard step. Saves are idempotent: before a rate plan ID
//! exists the Details save is keyed by a client correlation token, after
//! that every save is keyed by `(rate_plan_id, step)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rateplan_common::{CorrelationToken, RatePlanId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{NormalizedExtras, WizardStep};
use crate::pricing::{NormalizedPricing, PricingModelType};

/// Gateway result type
pub type PersistResult<T> = Result<T, PersistError>;

/// Persistence errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// Connectivity or availability problem; retry with the same payload
    #[error("transient network error: {0}")]
    Transient(String),

    /// Business-rule rejection; needs an edit before retrying
    #[error("rejected by server: {message}")]
    Rejected {
        /// Offending field, when the store names one
        field: Option<String>,
        /// Message to show the operator
        message: String,
    },

    /// Integration bug; never user-correctable
    #[error("fatal state error: {0}")]
    FatalState(String),
}

impl PersistError {
    /// Resubmitting the identical payload may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Authoritative values returned by the store; they always win over local ones
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerFields {
    /// ID minted or confirmed by the store
    pub rate_plan_id: Option<RatePlanId>,
    /// Name as stored
    pub rate_plan_name: Option<String>,
    /// Product reference as stored
    pub product_reference: Option<String>,
    /// Billing frequency as stored
    pub billing_frequency: Option<String>,
    /// Metric as stored
    pub billable_metric: Option<String>,
}

/// Idempotency key of a save
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyKey {
    /// First Details save, before the store has minted an ID
    Correlation(CorrelationToken),
    /// Any save once the plan has an ID
    Plan {
        /// Plan being saved
        rate_plan_id: RatePlanId,
        /// Step being saved
        step: WizardStep,
    },
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correlation(token) => write!(f, "correlation:{}", token),
            Self::Plan { rate_plan_id, step } => write!(f, "{}:{}", rate_plan_id, step),
        }
    }
}

/// Details step payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsPayload {
    /// Plan name
    pub rate_plan_name: String,
    /// Product ID or name
    pub product_reference: String,
    /// Free text, may be empty
    pub description: String,
    /// e.g. "monthly"
    pub billing_frequency: String,
    /// Model the pricing step will save
    pub pricing_model_type: PricingModelType,
}

/// Normalized payload of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepPayload {
    /// Plan details
    Details(DetailsPayload),
    /// Selected metric; `None` when the step was skipped
    BillableMetrics {
        /// Metric ID
        #[serde(rename = "billableMetric")]
        billable_metric: Option<String>,
    },
    /// Normalized pricing of the selected model
    PricingModel(NormalizedPricing),
    /// Normalized extras
    Extras(NormalizedExtras),
    /// Commit the draft
    Review,
}

impl StepPayload {
    /// Step this payload saves
    pub fn step(&self) -> WizardStep {
        match self {
            Self::Details(_) => WizardStep::Details,
            Self::BillableMetrics { .. } => WizardStep::BillableMetrics,
            Self::PricingModel(_) => WizardStep::PricingModel,
            Self::Extras(_) => WizardStep::Extras,
            Self::Review => WizardStep::Review,
        }
    }
}

/// One save call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    /// Step being saved
    pub step: WizardStep,
    /// Replays with the same key are answered, not reapplied
    pub key: IdempotencyKey,
    /// Normalized step data
    pub payload: StepPayload,
}

/// Remote rate plan store
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist one step and return the store's authoritative fields
    async fn save(&self, request: SaveRequest) -> PersistResult<ServerFields>;
}

#[async_trait]
impl<T: PersistenceGateway + ?Sized> PersistenceGateway for Arc<T> {
    async fn save(&self, request: SaveRequest) -> PersistResult<ServerFields> {
        (**self).save(request).await
    }
}

/// Deadline wrapper; an elapsed deadline is a transient error
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G: PersistenceGateway> TimeoutGateway<G> {
    /// Wrap `inner` so every save gives up after `timeout`
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<G: PersistenceGateway> PersistenceGateway for TimeoutGateway<G> {
    async fn save(&self, request: SaveRequest) -> PersistResult<ServerFields> {
        let step = request.step;
        match tokio::time::timeout(self.timeout, self.inner.save(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(step = %step, timeout_ms = self.timeout.as_millis() as u64, "save timed out");
                Err(PersistError::Transient(format!(
                    "save of {} timed out after {}ms",
                    step,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Committed rate plan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedRatePlan {
    /// Plan ID
    pub rate_plan_id: RatePlanId,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

/// Rate plan as held by the in-memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlan {
    /// Plan ID
    pub id: RatePlanId,
    /// Last saved details
    pub details: DetailsPayload,
    /// Last saved metric
    pub billable_metric: Option<String>,
    /// Last saved pricing
    pub pricing: Option<NormalizedPricing>,
    /// Last saved extras
    pub extras: Option<NormalizedExtras>,
    /// Set once Review is saved
    pub committed: Option<CommittedRatePlan>,
}

#[derive(Default)]
struct StoreState {
    plans: HashMap<RatePlanId, StoredPlan>,
    correlations: HashMap<CorrelationToken, RatePlanId>,
    writes: u64,
}

impl StoreState {
    fn name_taken(&self, name: &str, except: Option<&RatePlanId>) -> bool {
        self.plans
            .values()
            .any(|p| Some(&p.id) != except && p.details.rate_plan_name.eq_ignore_ascii_case(name))
    }
}

/// In-memory rate plan store (for testing and development)
pub struct InMemoryGateway {
    state: RwLock<StoreState>,
}

impl InMemoryGateway {
    /// Empty store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Stored copy of one plan
    pub fn plan(&self, id: &RatePlanId) -> Option<StoredPlan> {
        self.state.read().plans.get(id).cloned()
    }

    /// Number of plans created
    pub fn plan_count(&self) -> usize {
        self.state.read().plans.len()
    }

    /// Successful writes, resubmissions included
    pub fn write_count(&self) -> u64 {
        self.state.read().writes
    }

    fn save_details(state: &mut StoreState, key: &IdempotencyKey, details: &DetailsPayload) -> PersistResult<ServerFields> {
        let existing = match key {
            IdempotencyKey::Correlation(token) => state.correlations.get(token).cloned(),
            IdempotencyKey::Plan { rate_plan_id, .. } => {
                if !state.plans.contains_key(rate_plan_id) {
                    return Err(PersistError::FatalState(format!("unknown rate plan {}", rate_plan_id)));
                }
                Some(rate_plan_id.clone())
            }
        };

        let name = details.rate_plan_name.trim().to_string();
        if state.name_taken(&name, existing.as_ref()) {
            return Err(PersistError::Rejected {
                field: Some("ratePlanName".into()),
                message: format!("a rate plan named {:?} already exists", name),
            });
        }

        let mut stored = details.clone();
        stored.rate_plan_name = name;
        stored.billing_frequency = details.billing_frequency.trim().to_uppercase();

        let id = match existing {
            Some(id) => {
                let plan = state
                    .plans
                    .get_mut(&id)
                    .ok_or_else(|| PersistError::FatalState(format!("unknown rate plan {}", id)))?;
                plan.details = stored.clone();
                id
            }
            None => {
                let id = RatePlanId::new(format!("rp-{}", Uuid::new_v4().simple()))
                    .map_err(|e| PersistError::FatalState(e.to_string()))?;
                if let IdempotencyKey::Correlation(token) = key {
                    state.correlations.insert(*token, id.clone());
                }
                state.plans.insert(
                    id.clone(),
                    StoredPlan {
                        id: id.clone(),
                        details: stored.clone(),
                        billable_metric: None,
                        pricing: None,
                        extras: None,
                        committed: None,
                    },
                );
                tracing::debug!(rate_plan_id = %id, "minted rate plan");
                id
            }
        };

        Ok(ServerFields {
            rate_plan_id: Some(id),
            rate_plan_name: Some(stored.rate_plan_name),
            product_reference: Some(stored.product_reference),
            billing_frequency: Some(stored.billing_frequency),
            billable_metric: None,
        })
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save(&self, request: SaveRequest) -> PersistResult<ServerFields> {
        if request.payload.step() != request.step {
            return Err(PersistError::FatalState(format!(
                "{} payload sent for step {}",
                request.payload.step(),
                request.step
            )));
        }

        let mut state = self.state.write();

        if let StepPayload::Details(details) = &request.payload {
            let fields = Self::save_details(&mut state, &request.key, details)?;
            state.writes += 1;
            return Ok(fields);
        }

        let IdempotencyKey::Plan { rate_plan_id, .. } = &request.key else {
            return Err(PersistError::FatalState(format!(
                "{} saved without a rate plan ID",
                request.step
            )));
        };
        let plan = state
            .plans
            .get_mut(rate_plan_id)
            .ok_or_else(|| PersistError::FatalState(format!("unknown rate plan {}", rate_plan_id)))?;

        if plan.committed.is_some() && request.payload != StepPayload::Review {
            return Err(PersistError::Rejected {
                field: None,
                message: "rate plan is already committed".into(),
            });
        }

        let mut fields = ServerFields::default();
        match request.payload {
            StepPayload::Details(_) => {}
            StepPayload::BillableMetrics { billable_metric } => {
                plan.billable_metric = billable_metric.clone();
                fields.billable_metric = billable_metric;
            }
            StepPayload::PricingModel(pricing) => {
                if pricing.model_type() != plan.details.pricing_model_type {
                    return Err(PersistError::Rejected {
                        field: Some("pricingModelType".into()),
                        message: format!(
                            "plan is configured for {} pricing, got {}",
                            plan.details.pricing_model_type,
                            pricing.model_type()
                        ),
                    });
                }
                plan.pricing = Some(pricing);
            }
            StepPayload::Extras(extras) => plan.extras = Some(extras),
            StepPayload::Review => {
                if plan.pricing.is_none() {
                    return Err(PersistError::Rejected {
                        field: None,
                        message: "rate plan has no pricing".into(),
                    });
                }
                if plan.committed.is_none() {
                    plan.committed = Some(CommittedRatePlan {
                        rate_plan_id: plan.id.clone(),
                        committed_at: Utc::now(),
                    });
                    tracing::info!(rate_plan_id = %plan.id, "rate plan committed");
                }
            }
        }
        fields.rate_plan_id = Some(plan.id.clone());
        state.writes += 1;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{NormalizedUsage, PricingModelType};

    fn details(name: &str) -> DetailsPayload {
        DetailsPayload {
            rate_plan_name: name.into(),
            product_reference: "prod-1".into(),
            description: "test".into(),
            billing_frequency: "monthly".into(),
            pricing_model_type: PricingModelType::Usage,
        }
    }

    fn details_request(token: CorrelationToken, name: &str) -> SaveRequest {
        SaveRequest {
            step: WizardStep::Details,
            key: IdempotencyKey::Correlation(token),
            payload: StepPayload::Details(details(name)),
        }
    }

    fn plan_request(id: &RatePlanId, payload: StepPayload) -> SaveRequest {
        SaveRequest {
            step: payload.step(),
            key: IdempotencyKey::Plan { rate_plan_id: id.clone(), step: payload.step() },
            payload,
        }
    }

    #[tokio::test]
    async fn test_details_mints_id_once() {
        let gateway = InMemoryGateway::new();
        let token = CorrelationToken::generate();

        let first = gateway.save(details_request(token, "Starter")).await.unwrap();
        let second = gateway.save(details_request(token, "Starter")).await.unwrap();

        assert_eq!(first.rate_plan_id, second.rate_plan_id);
        assert_eq!(first.billing_frequency.as_deref(), Some("MONTHLY"));
        assert_eq!(gateway.plan_count(), 1);
        assert_eq!(gateway.write_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let gateway = InMemoryGateway::new();
        gateway.save(details_request(CorrelationToken::generate(), "Starter")).await.unwrap();

        let err = gateway
            .save(details_request(CorrelationToken::generate(), "starter"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PersistError::Rejected {
                field: Some("ratePlanName".into()),
                message: "a rate plan named \"starter\" already exists".into(),
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_later_step_without_id_is_fatal() {
        let gateway = InMemoryGateway::new();
        let request = SaveRequest {
            step: WizardStep::Extras,
            key: IdempotencyKey::Correlation(CorrelationToken::generate()),
            payload: StepPayload::Extras(NormalizedExtras::default()),
        };
        assert!(matches!(gateway.save(request).await, Err(PersistError::FatalState(_))));
    }

    #[tokio::test]
    async fn test_pricing_and_commit() {
        let gateway = InMemoryGateway::new();
        let id = gateway
            .save(details_request(CorrelationToken::generate(), "Metered"))
            .await
            .unwrap()
            .rate_plan_id
            .unwrap();

        let early = gateway.save(plan_request(&id, StepPayload::Review)).await;
        assert!(matches!(early, Err(PersistError::Rejected { .. })));

        let pricing = StepPayload::PricingModel(NormalizedPricing::Usage(NormalizedUsage {
            per_unit_amount: "$0.01".into(),
        }));
        gateway.save(plan_request(&id, pricing.clone())).await.unwrap();
        gateway.save(plan_request(&id, pricing)).await.unwrap();

        gateway.save(plan_request(&id, StepPayload::Review)).await.unwrap();
        let stored = gateway.plan(&id).unwrap();
        assert!(stored.committed.is_some());

        let after = gateway
            .save(plan_request(&id, StepPayload::Extras(NormalizedExtras::default())))
            .await;
        assert!(matches!(after, Err(PersistError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_pricing_model_must_match_details() {
        let gateway = InMemoryGateway::new();
        let id = gateway
            .save(details_request(CorrelationToken::generate(), "Mismatch"))
            .await
            .unwrap()
            .rate_plan_id
            .unwrap();
        let flat = StepPayload::PricingModel(NormalizedPricing::FlatFee(crate::pricing::NormalizedFlatFee {
            recurring_fee: "$5".into(),
            usage_limit: "10".into(),
            currency: "USD".into(),
        }));
        let err = gateway.save(plan_request(&id, flat)).await.unwrap_err();
        assert!(matches!(err, PersistError::Rejected { field: Some(ref f), .. } if f == "pricingModelType"));
    }

    struct SlowGateway;

    #[async_trait]
    impl PersistenceGateway for SlowGateway {
        async fn save(&self, _request: SaveRequest) -> PersistResult<ServerFields> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ServerFields::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_transient() {
        let gateway = TimeoutGateway::new(SlowGateway, Duration::from_millis(50));
        let err = gateway
            .save(details_request(CorrelationToken::generate(), "Slow"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_step_payload_wire_shape() {
        let payload = StepPayload::BillableMetrics { billable_metric: Some("m-1".into()) };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["step"], "billable_metrics");
        assert_eq!(json["billableMetric"], "m-1");

        let gateway = InMemoryGateway::new();
        let fields = tokio_test::block_on(gateway.save(details_request(CorrelationToken::generate(), "Wire")))
            .unwrap();
        assert!(fields.rate_plan_id.is_some());
    }
}
