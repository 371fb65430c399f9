//! Checkout pipeline: the wiring of the whole risk core.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. COD gate            (non-COD orders are skipped, nothing written)
//!   2. Intelligence        (write-once claim plus counters, one transaction)
//!   3. Risk assessment     (reads the counters step 2 just moved)
//!   4. Persist assessment  (order's risk fields via the `OrderBook`)
//!   5. Disposition         (high-risk policy)
//!
//! RULES:
//!   - Every store and service shares one repository and one clock.
//!   - Only this module talks to the `OrderBook`.

use crate::{
    address::{AddressQualityEvaluator, LocaleProfile},
    clock::Clock,
    config::{HighRiskAction, RiskConfig},
    device_reputation::DeviceReputationStore,
    error::{RiskError, RiskResult},
    feedback::{DeliveryFeedbackLoop, DeliveryStatus, FeedbackOutcome, ReturnReason},
    intelligence::{CheckoutContext, OrderIntelligenceCollector},
    ip_reputation::IpReputationStore,
    order::{CodOrder, OrderBook},
    phone_reputation::PhoneReputationStore,
    repository::ReputationRepository,
    reputation::{IpReputation, ReputationRecord},
    risk_engine::{RiskAssessment, RiskEngine, RiskLevel},
    types::{OrderId, ReputationKind},
    verification::{conversion_decision, ConversionDecision},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the checkout should do with the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Accept,
    Flag,
    Block,
    ManualReview,
    /// Not a COD order; the risk core did not look at it.
    Skipped,
}

impl Disposition {
    pub fn for_level(level: RiskLevel, action: HighRiskAction) -> Self {
        match (level, action) {
            (RiskLevel::High, HighRiskAction::Flag)   => Disposition::Flag,
            (RiskLevel::High, HighRiskAction::Block)  => Disposition::Block,
            (RiskLevel::High, HighRiskAction::Manual) => Disposition::ManualReview,
            _                                         => Disposition::Accept,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Accept       => "accept",
            Disposition::Flag         => "flag",
            Disposition::Block        => "block",
            Disposition::ManualReview => "manual_review",
            Disposition::Skipped      => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutDecision {
    pub order_id:    OrderId,
    pub disposition: Disposition,
    /// None when skipped or when scoring failed.
    pub assessment:  Option<RiskAssessment>,
}

pub struct CheckoutPipeline {
    phones:    Arc<PhoneReputationStore>,
    ips:       Arc<IpReputationStore>,
    devices:   Arc<DeviceReputationStore>,
    collector: OrderIntelligenceCollector,
    engine:    RiskEngine,
    feedback:  DeliveryFeedbackLoop,
    orders:    Arc<dyn OrderBook>,
    config:    RiskConfig,
}

impl CheckoutPipeline {
    /// Wire every store and service over one repository, with the
    /// default address profile.
    pub fn build(
        config: RiskConfig,
        repo:   Arc<dyn ReputationRepository>,
        orders: Arc<dyn OrderBook>,
        clock:  Arc<dyn Clock>,
    ) -> Self {
        Self::with_evaluator(config, repo, orders, clock, Arc::new(LocaleProfile::default()))
    }

    pub fn with_evaluator(
        config:    RiskConfig,
        repo:      Arc<dyn ReputationRepository>,
        orders:    Arc<dyn OrderBook>,
        clock:     Arc<dyn Clock>,
        evaluator: Arc<dyn AddressQualityEvaluator>,
    ) -> Self {
        let phones  = Arc::new(PhoneReputationStore::new(repo.clone(), clock.clone()));
        let ips     = Arc::new(IpReputationStore::new(repo.clone(), clock.clone()));
        let devices = Arc::new(DeviceReputationStore::new(repo.clone(), clock.clone()));

        let collector = OrderIntelligenceCollector::new(repo.clone(), evaluator.clone(), clock);
        let engine = RiskEngine::new(
            repo,
            phones.clone(),
            ips.clone(),
            devices.clone(),
            evaluator,
            config.clone(),
        );
        let feedback = DeliveryFeedbackLoop::new(phones.clone(), config.feedback.clone());

        Self { phones, ips, devices, collector, engine, feedback, orders, config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    pub fn collector(&self) -> &OrderIntelligenceCollector {
        &self.collector
    }

    pub fn phones(&self) -> &PhoneReputationStore {
        &self.phones
    }

    // ── Checkout ───────────────────────────────────────────────

    /// Run the full checkout sequence. The order must already be in the
    /// order book so the assessment can be written back.
    ///
    /// A replayed checkout keeps the first intelligence record and does
    /// not count the order again; it is simply re-scored.
    pub fn process_checkout(
        &self,
        order:    &CodOrder,
        checkout: &CheckoutContext,
    ) -> RiskResult<CheckoutDecision> {
        if !order.is_cod() {
            log::debug!("order={} skipped: payment method {:?}", order.order_id, order.payment_method);
            return Ok(CheckoutDecision {
                order_id:    order.order_id,
                disposition: Disposition::Skipped,
                assessment:  None,
            });
        }

        match self.collector.collect(order, checkout) {
            Ok(_) => {}
            Err(RiskError::IntelligenceExists { order_id }) => {
                log::warn!("order={order_id} checkout replayed; keeping first intelligence record");
            }
            Err(e) => return Err(e),
        }

        let assessment = self.engine.assess(order)?;
        self.orders.save_assessment(order.order_id, &assessment)?;

        let disposition = Disposition::for_level(assessment.risk_level, self.config.high_risk_action);
        if disposition != Disposition::Accept {
            log::info!(
                "order={} {} (score={})",
                order.order_id,
                disposition.as_str(),
                assessment.total_score
            );
        }

        Ok(CheckoutDecision {
            order_id: order.order_id,
            disposition,
            assessment: Some(assessment),
        })
    }

    /// Checkout-facing wrapper: never fails. A scoring failure is logged
    /// and the order is flagged for a human instead.
    pub fn decide(&self, order: &CodOrder, checkout: &CheckoutContext) -> CheckoutDecision {
        match self.process_checkout(order, checkout) {
            Ok(decision) => decision,
            Err(e) => {
                log::error!(
                    "order={} risk scoring failed (retryable={}): {e}",
                    order.order_id,
                    e.is_retryable()
                );
                CheckoutDecision {
                    order_id:    order.order_id,
                    disposition: Disposition::Flag,
                    assessment:  None,
                }
            }
        }
    }

    /// Re-score an existing order from whatever intelligence is stored.
    pub fn compute_risk(&self, order_id: OrderId) -> RiskResult<RiskAssessment> {
        let order = self.load_order(order_id)?;
        let assessment = self.engine.assess(&order)?;
        self.orders.save_assessment(order_id, &assessment)?;
        Ok(assessment)
    }

    // ── Delivery feedback ──────────────────────────────────────
    //
    // Non-COD orders are left alone: no reputation change and no
    // delivery status written.

    pub fn report_delivery_outcome(
        &self,
        order_id:  OrderId,
        delivered: bool,
        reason:    Option<ReturnReason>,
    ) -> RiskResult<FeedbackOutcome> {
        let order = self.load_order(order_id)?;
        if !order.is_cod() {
            log::debug!("order={order_id} delivery report ignored: not COD");
            return Ok(FeedbackOutcome::NotCod);
        }
        let outcome = self
            .feedback
            .report_delivery_outcome(order_id, &order.billing_phone, delivered, reason)?;

        let (status, reason) = if delivered {
            (DeliveryStatus::Delivered, None)
        } else {
            (DeliveryStatus::Returned, reason)
        };
        self.orders.set_delivery(order_id, status, reason)?;
        Ok(outcome)
    }

    pub fn cancel_order(&self, order_id: OrderId) -> RiskResult<FeedbackOutcome> {
        let order = self.load_order(order_id)?;
        if !order.is_cod() {
            log::debug!("order={order_id} cancellation ignored: not COD");
            return Ok(FeedbackOutcome::NotCod);
        }
        let outcome = self.feedback.order_cancelled(order_id, &order.billing_phone)?;
        self.orders.set_delivery(order_id, DeliveryStatus::Returned, None)?;
        Ok(outcome)
    }

    // ── Reputation views ───────────────────────────────────────

    /// Look up any reputation record. Returns None only for a phone that
    /// does not normalize; phones and IPs are created on first lookup.
    pub fn get_reputation(&self, kind: ReputationKind, key: &str) -> RiskResult<Option<ReputationRecord>> {
        Ok(match kind {
            ReputationKind::Phone  => self.phones.lookup(key)?.map(ReputationRecord::Phone),
            ReputationKind::Ip     => Some(ReputationRecord::Ip(self.ips.get_reputation(key)?)),
            ReputationKind::Device => Some(ReputationRecord::Device(self.devices.get_reputation(key)?)),
        })
    }

    pub fn block_ip(&self, ip: &str, blocked: bool) -> RiskResult<IpReputation> {
        self.ips.set_blocked(ip, blocked)
    }

    /// Whether the order may be reported to the ad-conversion collaborator.
    pub fn conversion_decision(&self, order_id: OrderId) -> RiskResult<ConversionDecision> {
        let order = self.load_order(order_id)?;
        let phone = self.phones.lookup(&order.billing_phone)?;
        Ok(conversion_decision(&order, phone.as_ref(), &self.config.conversion))
    }

    fn load_order(&self, order_id: OrderId) -> RiskResult<CodOrder> {
        self.orders
            .order(order_id)?
            .ok_or(RiskError::OrderNotFound { order_id })
    }
}
