//! Order intelligence collector. Runs once per COD order at checkout.
//!
//! Order of work:
//!   1. Normalize identifiers and score the address.
//!   2. Derive risk factors.
//!   3. Claim the order and count it against the phone, IP and device,
//!      all in one repository transaction. A replayed checkout fails the
//!      claim and touches no reputation; a failed write leaves nothing
//!      behind, so a retry counts the order exactly once.

use crate::{
    address::{AddressQualityEvaluator, ShippingAddress},
    behavior::{behavior_factors, BehaviorSignals, RiskFactor},
    clock::Clock,
    device_reputation::DeviceSignal,
    error::RiskResult,
    ip_reputation::{resolve_real_ip, ConnectionInfo},
    order::CodOrder,
    phone_reputation::NormalizedPhone,
    repository::ReputationRepository,
    reputation::OrderIntelligence,
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything the storefront captured alongside an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutContext {
    /// Resolved client IP.
    pub ip:       String,
    #[serde(default)]
    pub device:   DeviceSignal,
    #[serde(default)]
    pub behavior: BehaviorSignals,
    /// Phone as typed at checkout, when it differs from the stored billing phone.
    #[serde(default)]
    pub phone:    Option<String>,
}

impl CheckoutContext {
    pub fn from_connection(conn: &ConnectionInfo, device: DeviceSignal, behavior: BehaviorSignals) -> Self {
        Self {
            ip: resolve_real_ip(conn),
            device,
            behavior,
            phone: None,
        }
    }
}

pub struct OrderIntelligenceCollector {
    repo:      Arc<dyn ReputationRepository>,
    evaluator: Arc<dyn AddressQualityEvaluator>,
    clock:     Arc<dyn Clock>,
}

impl OrderIntelligenceCollector {
    pub fn new(
        repo:      Arc<dyn ReputationRepository>,
        evaluator: Arc<dyn AddressQualityEvaluator>,
        clock:     Arc<dyn Clock>,
    ) -> Self {
        Self { repo, evaluator, clock }
    }

    /// Collect for a platform order, preferring the checkout-typed phone.
    pub fn collect(&self, order: &CodOrder, checkout: &CheckoutContext) -> RiskResult<OrderIntelligence> {
        let phone = checkout
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&order.billing_phone);
        self.record_order_intelligence(
            order.order_id,
            phone,
            &checkout.ip,
            &checkout.device,
            checkout.behavior,
            &order.billing_address,
        )
    }

    pub fn record_order_intelligence(
        &self,
        order_id:  OrderId,
        raw_phone: &str,
        ip:        &str,
        device:    &DeviceSignal,
        behavior:  BehaviorSignals,
        address:   &ShippingAddress,
    ) -> RiskResult<OrderIntelligence> {
        let phone = NormalizedPhone::parse(raw_phone);
        let quality = self.evaluator.evaluate(address);

        let mut factors = Vec::new();
        if phone.is_none() {
            factors.push(RiskFactor::InvalidPhone);
        }
        factors.extend(behavior_factors(&behavior));
        if !quality.is_complete {
            factors.push(RiskFactor::IncompleteAddress);
        }
        if !device.is_present() {
            factors.push(RiskFactor::MissingDevice);
        }

        let record = OrderIntelligence {
            order_id,
            phone:                phone.as_ref().map(|p| p.as_str().to_string()),
            ip_address:           ip.to_string(),
            device_hash:          device.is_present().then(|| device.hash.clone()),
            checkout_time:        behavior.checkout_time,
            pages_viewed:         behavior.pages_viewed,
            session_duration:     behavior.session_duration,
            address_completeness: quality.completeness,
            risk_factors:         factors.iter().map(|f| f.as_str().to_string()).collect(),
            created_at:           self.clock.now(),
        };

        self.repo.record_checkout(&record, &device.browser_info)?;

        log::debug!(
            "order={order_id} intelligence: phone={} ip={ip} device={} completeness={} factors={:?}",
            record.phone.as_deref().unwrap_or("<invalid>"),
            record.device_hash.as_deref().unwrap_or("<none>"),
            record.address_completeness,
            record.risk_factors,
        );

        Ok(record)
    }
}
