//! Gate for reporting orders to an ad-conversion collaborator.
//!
//! Only the decision lives here. Sending the event is the caller's job.

use crate::{
    config::ConversionConfig,
    feedback::DeliveryStatus,
    order::{CodOrder, OverrideOutcome},
    reputation::PhoneReputation,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotCod,
    MissingCredentials,
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum ConversionDecision {
    Report,
    Skip(SkipReason),
}

/// Any one signal is enough.
pub fn is_order_verified(
    order:  &CodOrder,
    phone:  Option<&PhoneReputation>,
    config: &ConversionConfig,
) -> bool {
    if order.delivery_status == Some(DeliveryStatus::Delivered) {
        return true;
    }
    if order.vendor_override == Some(OverrideOutcome::Success) {
        return true;
    }
    if order.total > config.verified_total_threshold {
        return true;
    }
    if let Some(rep) = phone {
        if rep.order_count > 0 && rep.success_rate() >= config.verified_success_rate {
            return true;
        }
    }
    order.risk_score.is_some_and(|s| s < config.verified_max_risk)
}

/// Only cash-on-delivery orders are ever reported.
pub fn conversion_decision(
    order:  &CodOrder,
    phone:  Option<&PhoneReputation>,
    config: &ConversionConfig,
) -> ConversionDecision {
    if !order.is_cod() {
        return ConversionDecision::Skip(SkipReason::NotCod);
    }
    if !config.has_credentials() {
        return ConversionDecision::Skip(SkipReason::MissingCredentials);
    }
    if config.send_verified_only && !is_order_verified(order, phone, config) {
        log::debug!("order={} conversion skipped: unverified", order.order_id);
        return ConversionDecision::Skip(SkipReason::Unverified);
    }
    ConversionDecision::Report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ShippingAddress;

    fn order(total: f64) -> CodOrder {
        CodOrder::new(
            1,
            "01712345678",
            ShippingAddress::new("House 12, Road 5", "", "Dhaka", "1205"),
            total,
        )
    }

    fn credentials() -> ConversionConfig {
        ConversionConfig {
            pixel_id: Some("px".into()),
            access_token: Some("tok".into()),
            ..ConversionConfig::default()
        }
    }

    #[test]
    fn missing_credentials_skips_everything() {
        let mut o = order(10_000.0);
        o.delivery_status = Some(DeliveryStatus::Delivered);
        assert_eq!(
            conversion_decision(&o, None, &ConversionConfig::default()),
            ConversionDecision::Skip(SkipReason::MissingCredentials)
        );
    }

    #[test]
    fn fresh_small_order_is_unverified() {
        let o = order(800.0);
        assert!(!is_order_verified(&o, None, &credentials()));
        assert_eq!(
            conversion_decision(&o, None, &credentials()),
            ConversionDecision::Skip(SkipReason::Unverified)
        );
    }

    #[test]
    fn each_signal_verifies_alone() {
        let cfg = credentials();

        let mut delivered = order(800.0);
        delivered.delivery_status = Some(DeliveryStatus::Delivered);
        assert!(is_order_verified(&delivered, None, &cfg));

        let mut vendor = order(800.0);
        vendor.vendor_override = Some(OverrideOutcome::Success);
        assert!(is_order_verified(&vendor, None, &cfg));

        assert!(is_order_verified(&order(5000.01), None, &cfg));
        assert!(!is_order_verified(&order(5000.0), None, &cfg), "threshold is exclusive");

        let mut low_risk = order(800.0);
        low_risk.risk_score = Some(29);
        assert!(is_order_verified(&low_risk, None, &cfg));
        low_risk.risk_score = Some(30);
        assert!(!is_order_verified(&low_risk, None, &cfg));
    }

    #[test]
    fn phone_history_needs_at_least_one_order() {
        let cfg = credentials();
        let o = order(800.0);

        let fresh = PhoneReputation::new("01712345678");
        assert!(!is_order_verified(&o, Some(&fresh), &cfg));

        let mut good = PhoneReputation::new("01712345678");
        good.order_count = 5;
        good.return_count = 1;
        assert!(is_order_verified(&o, Some(&good), &cfg), "80% success rate qualifies");

        good.return_count = 2;
        assert!(!is_order_verified(&o, Some(&good), &cfg));
    }

    #[test]
    fn non_cod_orders_are_never_reported() {
        let mut o = order(10_000.0).with_payment_method("bkash");
        o.delivery_status = Some(DeliveryStatus::Delivered);
        assert_eq!(
            conversion_decision(&o, None, &credentials()),
            ConversionDecision::Skip(SkipReason::NotCod)
        );
    }

    #[test]
    fn unverified_orders_report_when_gate_is_off() {
        let cfg = ConversionConfig { send_verified_only: false, ..credentials() };
        assert_eq!(conversion_decision(&order(800.0), None, &cfg), ConversionDecision::Report);
    }
}
