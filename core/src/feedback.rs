//! Delivery feedback loop: closes the gap between predicted risk and
//! what the courier actually saw.
//!
//! Fires once per outcome change per order: reporting the status an
//! order already carries is a no-op, so a courier webhook retried twice
//! cannot penalize (or credit) the buyer twice. Changing the outcome
//! (delivered → returned) applies the new outcome.
//!
//! Cancellation is treated as a return with no stated reason.

use crate::{
    config::FeedbackConfig,
    error::RiskResult,
    phone_reputation::{NormalizedPhone, PhoneReputationStore},
    reputation::PhoneReputation,
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Returned,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Returned  => "returned",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryStatus::Delivered),
            "returned"  => Ok(DeliveryStatus::Returned),
            other       => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// Courier return-reason taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason {
    Unreachable,
    WrongNumber,
    AddressIssue,
    IncompleteAddress,
    Refused,
    Other,
}

impl ReturnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnReason::Unreachable       => "unreachable",
            ReturnReason::WrongNumber       => "wrong_number",
            ReturnReason::AddressIssue      => "address_issue",
            ReturnReason::IncompleteAddress => "incomplete_address",
            ReturnReason::Refused           => "refused",
            ReturnReason::Other             => "other",
        }
    }
}

impl std::str::FromStr for ReturnReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unreachable"        => Ok(ReturnReason::Unreachable),
            "wrong_number"       => Ok(ReturnReason::WrongNumber),
            "address_issue"      => Ok(ReturnReason::AddressIssue),
            "incomplete_address" => Ok(ReturnReason::IncompleteAddress),
            "refused"            => Ok(ReturnReason::Refused),
            "other"              => Ok(ReturnReason::Other),
            other                => Err(format!("unknown return reason '{other}'")),
        }
    }
}

/// What happened to a feedback report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The phone reputation was revised.
    Applied(PhoneReputation),
    /// The order already carried this outcome; nothing changed.
    Unchanged,
    /// The order's phone does not normalize; there is nothing to revise.
    InvalidPhone,
    /// Not a COD order; reputation is never touched.
    NotCod,
}

pub struct DeliveryFeedbackLoop {
    phones: Arc<PhoneReputationStore>,
    config: FeedbackConfig,
}

impl DeliveryFeedbackLoop {
    pub fn new(phones: Arc<PhoneReputationStore>, config: FeedbackConfig) -> Self {
        Self { phones, config }
    }

    pub fn report_delivery_outcome(
        &self,
        order_id:  OrderId,
        raw_phone: &str,
        delivered: bool,
        reason:    Option<ReturnReason>,
    ) -> RiskResult<FeedbackOutcome> {
        let status = if delivered { DeliveryStatus::Delivered } else { DeliveryStatus::Returned };
        self.apply(order_id, raw_phone, status, reason)
    }

    /// The order moved to a cancelled state after dispatch.
    pub fn order_cancelled(&self, order_id: OrderId, raw_phone: &str) -> RiskResult<FeedbackOutcome> {
        self.apply(order_id, raw_phone, DeliveryStatus::Returned, None)
    }

    fn apply(
        &self,
        order_id:  OrderId,
        raw_phone: &str,
        status:    DeliveryStatus,
        reason:    Option<ReturnReason>,
    ) -> RiskResult<FeedbackOutcome> {
        let Some(phone) = NormalizedPhone::parse(raw_phone) else {
            log::debug!("order={order_id} feedback ignored: phone does not normalize");
            return Ok(FeedbackOutcome::InvalidPhone);
        };

        let revised = self
            .phones
            .apply_delivery_outcome(order_id, &phone, status, reason, &self.config)?;

        match revised {
            Some(rep) => {
                log::info!(
                    "order={order_id} phone={phone} {}{} -> risk_score={} ({}/{} returned)",
                    status.as_str(),
                    reason.map(|r| format!(" ({})", r.as_str())).unwrap_or_default(),
                    rep.risk_score,
                    rep.return_count,
                    rep.order_count,
                );
                Ok(FeedbackOutcome::Applied(rep))
            }
            None => {
                log::debug!("order={order_id} already {}; no change", status.as_str());
                Ok(FeedbackOutcome::Unchanged)
            }
        }
    }
}
