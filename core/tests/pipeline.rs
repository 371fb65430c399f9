//! Checkout pipeline tests.
//!
//! Tests cover: COD gating, intelligence collection, dispositions under
//! each high-risk policy, degradation to flag, replayed and retried
//! checkouts, IP resolution from proxy headers, the cached breakdown, and
//! delivery feedback through the order book.

use chrono::{TimeZone, Utc};
use codshield_core::{
    address::ShippingAddress,
    behavior::BehaviorSignals,
    clock::FixedClock,
    config::{HighRiskAction, RiskConfig},
    device_reputation::DeviceSignal,
    error::{RiskError, RiskResult},
    feedback::{DeliveryStatus, FeedbackOutcome, ReturnReason},
    intelligence::CheckoutContext,
    ip_reputation::ConnectionInfo,
    order::{CodOrder, MemoryOrderBook, OrderBook},
    pipeline::{CheckoutPipeline, Disposition},
    repository::{DeliveryRecord, MemoryRepository, ReputationRepository},
    reputation::{DeviceReputation, IpReputation, OrderIntelligence, PhoneReputation, ReputationRecord},
    risk_engine::{RiskAssessment, RiskLevel},
    types::{OrderId, ReputationKind, Timestamp},
    verification::{ConversionDecision, SkipReason},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Rig {
    pipeline: CheckoutPipeline,
    book:     Arc<MemoryOrderBook>,
    repo:     Arc<MemoryRepository>,
}

fn rig(config: RiskConfig) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();
    let repo = Arc::new(MemoryRepository::new());
    let book = Arc::new(MemoryOrderBook::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()));
    let pipeline = CheckoutPipeline::build(config, repo.clone(), book.clone(), clock);
    Rig { pipeline, book, repo }
}

fn good_order(order_id: u64) -> CodOrder {
    CodOrder::new(
        order_id,
        "+8801712345678",
        ShippingAddress::new("House 12, Road 7, Block C", "Flat 4B", "Banani", "1213"),
        1500.0,
    )
}

fn good_checkout() -> CheckoutContext {
    CheckoutContext {
        ip: "203.0.113.10".into(),
        device: DeviceSignal::new("a1f3", "Mozilla/5.0"),
        behavior: BehaviorSignals::new(300, 8, 900),
        phone: None,
    }
}

/// Invalid phone, no fingerprint, nothing measured, empty address.
fn bad_order(order_id: u64) -> CodOrder {
    CodOrder::new(order_id, "12345", ShippingAddress::default(), 700.0)
}

fn bad_checkout(ip: &str) -> CheckoutContext {
    CheckoutContext { ip: ip.into(), ..CheckoutContext::default() }
}

#[test]
fn careful_buyer_is_accepted() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(1)).unwrap();

    let decision = rig.pipeline.process_checkout(&good_order(1), &good_checkout()).unwrap();
    let a = decision.assessment.expect("assessment");
    // phone 0 (1 order, no returns), ip 30, device 8, behavior 18, address 0
    assert_eq!(a.breakdown.phone_risk, 0);
    assert_eq!(a.breakdown.ip_risk, 30);
    assert_eq!(a.breakdown.device_risk, 8);
    assert_eq!(a.breakdown.behavior_risk, 18);
    assert_eq!(a.breakdown.address_risk, 0);
    assert_eq!(a.total_score, 12);
    assert_eq!(a.risk_level, RiskLevel::Low);
    assert_eq!(decision.disposition, Disposition::Accept);
}

#[test]
fn checkout_records_intelligence_and_counts_once() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(bad_order(2)).unwrap();
    rig.pipeline.process_checkout(&bad_order(2), &bad_checkout("198.51.100.7")).unwrap();

    let intel = rig.repo.intelligence(2).unwrap().expect("intelligence written");
    assert_eq!(intel.phone, None);
    assert_eq!(intel.device_hash, None);
    assert_eq!(
        intel.risk_factors,
        vec!["invalid_phone", "incomplete_address", "missing_device"]
    );
    assert_eq!(rig.repo.ip("198.51.100.7").unwrap().unwrap().order_count, 1);
}

#[test]
fn replayed_checkout_does_not_double_count() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(3)).unwrap();

    let first = rig.pipeline.process_checkout(&good_order(3), &good_checkout()).unwrap();
    let second = rig.pipeline.process_checkout(&good_order(3), &good_checkout()).unwrap();

    assert_eq!(rig.repo.phone("01712345678").unwrap().unwrap().order_count, 1);
    assert_eq!(rig.repo.ip("203.0.113.10").unwrap().unwrap().order_count, 1);
    assert_eq!(first.assessment, second.assessment);
}

#[test]
fn non_cod_orders_are_skipped_without_side_effects() {
    let rig = rig(RiskConfig::default());
    let order = good_order(4).with_payment_method("bkash");
    rig.book.insert(order.clone()).unwrap();

    let decision = rig.pipeline.process_checkout(&order, &good_checkout()).unwrap();
    assert_eq!(decision.disposition, Disposition::Skipped);
    assert!(decision.assessment.is_none());
    assert!(rig.repo.intelligence(4).unwrap().is_none());
    assert!(rig.repo.phone("01712345678").unwrap().is_none());
    assert!(rig.book.order(4).unwrap().unwrap().risk_score.is_none());
}

#[test]
fn high_risk_policy_maps_to_disposition() {
    for (action, expected) in [
        (HighRiskAction::Flag, Disposition::Flag),
        (HighRiskAction::Block, Disposition::Block),
        (HighRiskAction::Manual, Disposition::ManualReview),
    ] {
        let rig = rig(RiskConfig { high_risk_action: action, ..RiskConfig::default() });
        rig.pipeline.block_ip("192.0.2.44", true).unwrap();
        rig.book.insert(bad_order(5)).unwrap();

        let decision = rig.pipeline.process_checkout(&bad_order(5), &bad_checkout("192.0.2.44")).unwrap();
        let a = decision.assessment.expect("assessment");
        // (80*30 + 100*20 + 30*15 + 50*25 + 100*10) / 100
        assert_eq!(a.total_score, 71);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(decision.disposition, expected, "{action:?}");
    }
}

#[test]
fn medium_risk_is_still_accepted() {
    let rig = rig(RiskConfig { high_risk_action: HighRiskAction::Block, ..RiskConfig::default() });
    rig.book.insert(bad_order(6)).unwrap();

    let decision = rig.pipeline.process_checkout(&bad_order(6), &bad_checkout("198.51.100.8")).unwrap();
    let a = decision.assessment.expect("assessment");
    // ip counted once → 30: (2400 + 600 + 450 + 1250 + 1000) / 100
    assert_eq!(a.total_score, 57);
    assert_eq!(a.risk_level, RiskLevel::Medium);
    assert_eq!(decision.disposition, Disposition::Accept);
}

#[test]
fn scoring_failure_degrades_to_flag() {
    let rig = rig(RiskConfig::default());
    // Not in the order book, so the assessment cannot be saved.
    let decision = rig.pipeline.decide(&good_order(7), &good_checkout());
    assert_eq!(decision.disposition, Disposition::Flag);
    assert!(decision.assessment.is_none());

    assert!(matches!(
        rig.pipeline.process_checkout(&good_order(8), &good_checkout()),
        Err(RiskError::OrderNotFound { order_id: 8 })
    ));
}

#[test]
fn assessment_is_cached_on_the_order() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(9)).unwrap();
    let decision = rig.pipeline.process_checkout(&good_order(9), &good_checkout()).unwrap();

    let order = rig.book.order(9).unwrap().unwrap();
    let cached: RiskAssessment =
        serde_json::from_str(order.risk_breakdown.as_deref().expect("breakdown cached")).unwrap();
    assert_eq!(Some(cached.clone()), decision.assessment);
    assert_eq!(order.risk_score, Some(cached.total_score));
    assert_eq!(order.risk_level, Some(cached.risk_level));
}

#[test]
fn compute_risk_rescores_from_stored_intelligence() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(10)).unwrap();
    let at_checkout = rig.pipeline.process_checkout(&good_order(10), &good_checkout()).unwrap();

    let rescored = rig.pipeline.compute_risk(10).unwrap();
    assert_eq!(Some(rescored), at_checkout.assessment);

    assert!(matches!(
        rig.pipeline.compute_risk(999),
        Err(RiskError::OrderNotFound { order_id: 999 })
    ));
}

#[test]
fn returns_raise_the_next_assessment() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(11)).unwrap();
    let before = rig.pipeline.process_checkout(&good_order(11), &good_checkout()).unwrap();

    let outcome = rig
        .pipeline
        .report_delivery_outcome(11, false, Some(ReturnReason::Unreachable))
        .unwrap();
    assert!(matches!(outcome, FeedbackOutcome::Applied(_)));

    let order = rig.book.order(11).unwrap().unwrap();
    assert_eq!(order.delivery_status, Some(DeliveryStatus::Returned));
    assert_eq!(order.return_reason, Some(ReturnReason::Unreachable));

    let after = rig.pipeline.compute_risk(11).unwrap();
    let before = before.assessment.expect("assessment");
    assert!(
        after.breakdown.phone_risk > before.breakdown.phone_risk,
        "phone risk should rise after a return: {} -> {}",
        before.breakdown.phone_risk,
        after.breakdown.phone_risk
    );
}

#[test]
fn cancel_marks_order_returned() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(12)).unwrap();
    rig.pipeline.process_checkout(&good_order(12), &good_checkout()).unwrap();

    assert!(matches!(rig.pipeline.cancel_order(12).unwrap(), FeedbackOutcome::Applied(_)));
    assert_eq!(rig.pipeline.cancel_order(12).unwrap(), FeedbackOutcome::Unchanged);
    assert_eq!(
        rig.book.order(12).unwrap().unwrap().delivery_status,
        Some(DeliveryStatus::Returned)
    );
}

#[test]
fn reputation_views_by_kind() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(13)).unwrap();
    rig.pipeline.process_checkout(&good_order(13), &good_checkout()).unwrap();

    match rig.pipeline.get_reputation(ReputationKind::Phone, "01712345678").unwrap() {
        Some(ReputationRecord::Phone(p)) => assert_eq!(p.order_count, 1),
        other => panic!("expected phone record, got {other:?}"),
    }
    let device = rig.pipeline.get_reputation(ReputationKind::Device, "a1f3").unwrap().unwrap();
    assert_eq!(device.kind(), ReputationKind::Device);
    assert_eq!(device.order_count(), 1);

    let unseen = rig.pipeline.get_reputation(ReputationKind::Device, "ffff").unwrap().unwrap();
    assert_eq!(unseen.order_count(), 0);
    assert!(rig.repo.device("ffff").unwrap().is_none(), "device lookups do not persist");

    assert!(rig.pipeline.get_reputation(ReputationKind::Phone, "12345").unwrap().is_none());
}

#[test]
fn conversion_gate_reads_order_and_phone() {
    let mut config = RiskConfig::default();
    config.conversion.pixel_id = Some("px".into());
    config.conversion.access_token = Some("tok".into());
    let rig = rig(config);

    rig.book.insert(bad_order(14)).unwrap();
    rig.pipeline.process_checkout(&bad_order(14), &bad_checkout("198.51.100.9")).unwrap();
    assert_eq!(
        rig.pipeline.conversion_decision(14).unwrap(),
        ConversionDecision::Skip(SkipReason::Unverified)
    );

    rig.book.insert(good_order(15)).unwrap();
    rig.pipeline.process_checkout(&good_order(15), &good_checkout()).unwrap();
    assert_eq!(
        rig.pipeline.conversion_decision(15).unwrap(),
        ConversionDecision::Report,
        "clean phone history and a low cached score both verify"
    );
}

#[test]
fn non_cod_feedback_leaves_reputation_alone() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(16).with_payment_method("bkash")).unwrap();

    assert_eq!(rig.pipeline.cancel_order(16).unwrap(), FeedbackOutcome::NotCod);
    assert_eq!(
        rig.pipeline
            .report_delivery_outcome(16, false, Some(ReturnReason::Refused))
            .unwrap(),
        FeedbackOutcome::NotCod
    );

    assert!(rig.repo.phone("01712345678").unwrap().is_none());
    assert!(rig.repo.delivery(16).unwrap().is_none());
    assert_eq!(rig.book.order(16).unwrap().unwrap().delivery_status, None);
    assert_eq!(
        rig.pipeline.conversion_decision(16).unwrap(),
        ConversionDecision::Skip(SkipReason::NotCod)
    );
}

#[test]
fn client_ip_is_resolved_from_proxy_headers() {
    let rig = rig(RiskConfig::default());
    rig.book.insert(good_order(17)).unwrap();

    let conn = ConnectionInfo::new("10.0.0.1")
        .with_header("X-Forwarded-For", "198.51.100.23, 10.0.0.7");
    let checkout = CheckoutContext::from_connection(
        &conn,
        DeviceSignal::new("a1f3", "Mozilla/5.0"),
        BehaviorSignals::new(300, 8, 900),
    );
    rig.pipeline.process_checkout(&good_order(17), &checkout).unwrap();

    assert_eq!(rig.repo.intelligence(17).unwrap().unwrap().ip_address, "198.51.100.23");
    assert_eq!(rig.repo.ip("198.51.100.23").unwrap().unwrap().order_count, 1);
    assert!(rig.repo.ip("10.0.0.1").unwrap().is_none(), "proxy address is never counted");
}

/// Memory repository whose first checkout write fails.
struct FlakyRepository {
    inner:  MemoryRepository,
    failed: AtomicBool,
}

impl ReputationRepository for FlakyRepository {
    fn phone(&self, phone: &str) -> RiskResult<Option<PhoneReputation>> {
        self.inner.phone(phone)
    }
    fn phone_or_create(&self, phone: &str, now: Timestamp) -> RiskResult<PhoneReputation> {
        self.inner.phone_or_create(phone, now)
    }
    fn modify_phone(
        &self,
        phone: &str,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<PhoneReputation> {
        self.inner.modify_phone(phone, update)
    }
    fn ip(&self, ip: &str) -> RiskResult<Option<IpReputation>> {
        self.inner.ip(ip)
    }
    fn ip_or_create(&self, ip: &str, now: Timestamp) -> RiskResult<IpReputation> {
        self.inner.ip_or_create(ip, now)
    }
    fn modify_ip(
        &self,
        ip: &str,
        update: &mut dyn FnMut(&mut IpReputation),
    ) -> RiskResult<IpReputation> {
        self.inner.modify_ip(ip, update)
    }
    fn device(&self, hash: &str) -> RiskResult<Option<DeviceReputation>> {
        self.inner.device(hash)
    }
    fn modify_device(
        &self,
        hash: &str,
        update: &mut dyn FnMut(&mut DeviceReputation),
    ) -> RiskResult<DeviceReputation> {
        self.inner.modify_device(hash, update)
    }
    fn insert_intelligence(&self, record: &OrderIntelligence) -> RiskResult<()> {
        self.inner.insert_intelligence(record)
    }
    fn intelligence(&self, order_id: OrderId) -> RiskResult<Option<OrderIntelligence>> {
        self.inner.intelligence(order_id)
    }
    fn record_checkout(&self, record: &OrderIntelligence, browser_info: &str) -> RiskResult<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(RiskError::StoreUnavailable { reason: "connection reset".into() });
        }
        self.inner.record_checkout(record, browser_info)
    }
    fn delivery(&self, order_id: OrderId) -> RiskResult<Option<DeliveryRecord>> {
        self.inner.delivery(order_id)
    }
    fn transition_delivery(
        &self,
        record: &DeliveryRecord,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<Option<PhoneReputation>> {
        self.inner.transition_delivery(record, update)
    }
}

#[test]
fn retried_checkout_counts_every_signal_once() {
    let repo = Arc::new(FlakyRepository { inner: MemoryRepository::new(), failed: AtomicBool::new(false) });
    let book = Arc::new(MemoryOrderBook::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()));
    let pipeline = CheckoutPipeline::build(RiskConfig::default(), repo.clone(), book.clone(), clock);
    book.insert(good_order(18)).unwrap();

    let err = pipeline.process_checkout(&good_order(18), &good_checkout()).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert!(repo.intelligence(18).unwrap().is_none());

    let decision = pipeline.process_checkout(&good_order(18), &good_checkout()).unwrap();
    assert_eq!(decision.disposition, Disposition::Accept);
    assert_eq!(repo.phone("01712345678").unwrap().unwrap().order_count, 1);
    assert_eq!(repo.ip("203.0.113.10").unwrap().unwrap().order_count, 1);
    assert_eq!(repo.device("a1f3").unwrap().unwrap().order_count, 1);
}
