//! Risk engine. Turns reputation, behavior and address signals into a
//! composite score and a three-tier level.
//!
//! SUB-SCORES (each 0–100, higher is riskier):
//!   phone     invalid → 80, unseen → 40, else stored reputation; the
//!             phone counted at checkout wins over the billing phone
//!   ip        blocked → 100, else order-volume curve
//!   device    no fingerprint → 30, unseen → 25, else stored reputation
//!   behavior  mean of measured checkout factors, nothing measured → 50
//!   address   100 − completeness
//!
//! The composite is the weight-averaged sum (weights sum to 100),
//! rounded and clamped. Reads may create zeroed phone/IP records; they
//! never change counters.

use crate::{
    address::AddressQualityEvaluator,
    behavior::{BehaviorSignals, NEUTRAL_BEHAVIOR_SCORE},
    config::{RiskConfig, RiskWeights},
    device_reputation::DeviceReputationStore,
    error::RiskResult,
    ip_reputation::IpReputationStore,
    order::CodOrder,
    phone_reputation::{NormalizedPhone, PhoneReputationStore},
    repository::ReputationRepository,
    reputation::{ip_score, OrderIntelligence},
    types::{clamp_score, OrderId},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const INVALID_PHONE_RISK: u8 = 80;
const UNSEEN_PHONE_RISK: u8 = 40;
const MISSING_DEVICE_RISK: u8 = 30;
const UNSEEN_DEVICE_RISK: u8 = 25;
const BLOCKED_IP_RISK: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low    => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High   => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five named sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub phone_risk:    u8,
    pub ip_risk:       u8,
    pub device_risk:   u8,
    pub behavior_risk: u8,
    pub address_risk:  u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub order_id:    OrderId,
    pub total_score: u8,
    #[serde(flatten)]
    pub breakdown:   RiskBreakdown,
    pub risk_level:  RiskLevel,
}

impl RiskAssessment {
    /// Serialized form cached as the order's `risk_breakdown`.
    pub fn to_json(&self) -> RiskResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Weighted composite of the sub-scores.
pub fn composite_score(b: &RiskBreakdown, w: &RiskWeights) -> u8 {
    let weighted = b.phone_risk as u32 * w.phone
        + b.ip_risk as u32 * w.ip
        + b.device_risk as u32 * w.device
        + b.behavior_risk as u32 * w.behavior
        + b.address_risk as u32 * w.address;
    clamp_score((weighted as f64 / 100.0).round() as i64)
}

/// Thresholds are inclusive on the lower bound of each band.
pub fn classify(total: u8, config: &RiskConfig) -> RiskLevel {
    if total >= config.high_threshold {
        RiskLevel::High
    } else if total >= config.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub struct RiskEngine {
    repo:      Arc<dyn ReputationRepository>,
    phones:    Arc<PhoneReputationStore>,
    ips:       Arc<IpReputationStore>,
    devices:   Arc<DeviceReputationStore>,
    evaluator: Arc<dyn AddressQualityEvaluator>,
    config:    RiskConfig,
}

impl RiskEngine {
    pub fn new(
        repo:      Arc<dyn ReputationRepository>,
        phones:    Arc<PhoneReputationStore>,
        ips:       Arc<IpReputationStore>,
        devices:   Arc<DeviceReputationStore>,
        evaluator: Arc<dyn AddressQualityEvaluator>,
        config:    RiskConfig,
    ) -> Self {
        Self { repo, phones, ips, devices, evaluator, config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Assess one order. Store failures propagate; no score is invented.
    pub fn assess(&self, order: &CodOrder) -> RiskResult<RiskAssessment> {
        let intel = self.repo.intelligence(order.order_id)?;
        let phone = match &intel {
            Some(i) => i.phone.as_deref(),
            None => Some(order.billing_phone.as_str()),
        };

        let breakdown = RiskBreakdown {
            phone_risk:    self.phone_risk(phone)?,
            ip_risk:       self.ip_risk(intel.as_ref())?,
            device_risk:   self.device_risk(intel.as_ref())?,
            behavior_risk: behavior_risk(intel.as_ref()),
            address_risk:  100 - self.evaluator.evaluate(&order.billing_address).completeness.min(100),
        };

        let assessment = self.finish(order.order_id, breakdown);
        if assessment.risk_level == RiskLevel::High {
            log::warn!(
                "order={} high risk: total={} {:?}",
                order.order_id, assessment.total_score, assessment.breakdown
            );
        } else {
            log::debug!(
                "order={} risk: total={} level={} {:?}",
                order.order_id, assessment.total_score, assessment.risk_level, assessment.breakdown
            );
        }
        Ok(assessment)
    }

    /// Combine precomputed sub-scores with the configured weights and
    /// thresholds.
    pub fn finish(&self, order_id: OrderId, breakdown: RiskBreakdown) -> RiskAssessment {
        let total_score = composite_score(&breakdown, &self.config.weights);
        RiskAssessment {
            order_id,
            total_score,
            breakdown,
            risk_level: classify(total_score, &self.config),
        }
    }

    pub fn risk_level(&self, total: u8) -> RiskLevel {
        classify(total, &self.config)
    }

    fn phone_risk(&self, raw_phone: Option<&str>) -> RiskResult<u8> {
        let Some(phone) = raw_phone.and_then(NormalizedPhone::parse) else {
            return Ok(INVALID_PHONE_RISK);
        };
        let rep = self.phones.get_reputation(&phone)?;
        Ok(if rep.order_count == 0 { UNSEEN_PHONE_RISK } else { rep.risk_score })
    }

    fn ip_risk(&self, intel: Option<&OrderIntelligence>) -> RiskResult<u8> {
        let Some(intel) = intel else {
            return Ok(ip_score(0));
        };
        let rep = self.ips.get_reputation(&intel.ip_address)?;
        Ok(if rep.blocked { BLOCKED_IP_RISK } else { ip_score(rep.order_count) })
    }

    fn device_risk(&self, intel: Option<&OrderIntelligence>) -> RiskResult<u8> {
        let Some(hash) = intel.and_then(|i| i.device_hash.as_deref()) else {
            return Ok(MISSING_DEVICE_RISK);
        };
        let rep = self.devices.get_reputation(hash)?;
        Ok(if rep.order_count == 0 { UNSEEN_DEVICE_RISK } else { rep.risk_score })
    }
}

fn behavior_risk(intel: Option<&OrderIntelligence>) -> u8 {
    match intel {
        Some(i) => BehaviorSignals::new(i.checkout_time, i.pages_viewed, i.session_duration).risk_score(),
        None => NEUTRAL_BEHAVIOR_SCORE,
    }
}
