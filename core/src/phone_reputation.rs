//! Phone normalization and the phone reputation store.
//!
//! Phones are keyed in the local mobile format: 11 digits, leading "01".
//! A number that does not normalize is never an error here; callers
//! treat it as a risk signal.

use crate::{
    clock::Clock,
    config::FeedbackConfig,
    error::RiskResult,
    feedback::{DeliveryStatus, ReturnReason},
    repository::{DeliveryRecord, ReputationRepository},
    reputation::PhoneReputation,
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const COUNTRY_PREFIX: &str = "880";
const NATIONAL_LENGTH: usize = 11;
const MOBILE_PREFIX: &str = "01";

/// A phone number in canonical national form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPhone(String);

impl NormalizedPhone {
    /// Strip formatting, fold the country prefix into a trunk "0", and
    /// accept only 11-digit mobile numbers. None means invalid.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if let Some(rest) = digits.strip_prefix(COUNTRY_PREFIX) {
            digits = format!("0{rest}");
        }
        if !digits.starts_with('0') {
            digits.insert(0, '0');
        }

        (digits.len() == NATIONAL_LENGTH && digits.starts_with(MOBILE_PREFIX))
            .then_some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-function form of [`NormalizedPhone::parse`].
pub fn normalize(raw: &str) -> Option<NormalizedPhone> {
    NormalizedPhone::parse(raw)
}

pub struct PhoneReputationStore {
    repo:  Arc<dyn ReputationRepository>,
    clock: Arc<dyn Clock>,
}

impl PhoneReputationStore {
    pub fn new(repo: Arc<dyn ReputationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Stored reputation, created zeroed (and persisted) on first lookup.
    pub fn get_reputation(&self, phone: &NormalizedPhone) -> RiskResult<PhoneReputation> {
        self.repo.phone_or_create(phone.as_str(), self.clock.now())
    }

    /// Raw-input convenience. Returns None for a phone that does not normalize.
    pub fn lookup(&self, raw: &str) -> RiskResult<Option<PhoneReputation>> {
        match NormalizedPhone::parse(raw) {
            Some(phone) => self.get_reputation(&phone).map(Some),
            None => Ok(None),
        }
    }

    /// Count one order against the phone. Returns Ok(None) and writes
    /// nothing when the phone is invalid.
    pub fn record_order(&self, raw: &str, is_returned: bool) -> RiskResult<Option<PhoneReputation>> {
        let Some(phone) = NormalizedPhone::parse(raw) else {
            log::debug!("record_order skipped: phone {raw:?} does not normalize");
            return Ok(None);
        };
        let now = self.clock.now();
        let rep = self
            .repo
            .modify_phone(phone.as_str(), &mut |rep| rep.count_order(is_returned, now))?;
        Ok(Some(rep))
    }

    /// Fold a courier outcome into the phone's reputation.
    ///
    /// Two layers run in one atomic update: the order is counted exactly
    /// as `record_order` would, then the score is nudged up by the
    /// reason's penalty (returned) or down by the delivery credit.
    /// Returns Ok(None) when the order already carries this status.
    pub fn apply_delivery_outcome(
        &self,
        order_id: OrderId,
        phone:    &NormalizedPhone,
        status:   DeliveryStatus,
        reason:   Option<ReturnReason>,
        feedback: &FeedbackConfig,
    ) -> RiskResult<Option<PhoneReputation>> {
        let now = self.clock.now();
        let is_returned = status == DeliveryStatus::Returned;
        let delta = if is_returned {
            feedback.penalty_for(reason) as i64
        } else {
            -(feedback.delivered_credit as i64)
        };

        let record = DeliveryRecord {
            order_id,
            phone: phone.as_str().to_string(),
            status,
            return_reason: if is_returned { reason } else { None },
            reported_at: now,
        };

        self.repo.transition_delivery(&record, &mut |rep| {
            rep.count_order(is_returned, now);
            rep.nudge(delta);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_and_national_forms_agree() {
        for raw in ["+8801712345678", "01712345678", "8801712345678", "+880 1712-345678"] {
            assert_eq!(
                normalize(raw).map(|p| p.to_string()).as_deref(),
                Some("01712345678"),
                "{raw} should normalize"
            );
        }
    }

    #[test]
    fn missing_trunk_zero_is_prepended() {
        assert_eq!(normalize("1712345678").unwrap().as_str(), "01712345678");
    }

    #[test]
    fn short_or_non_mobile_numbers_are_invalid() {
        assert!(normalize("123").is_none());
        assert!(normalize("017123").is_none());
        assert!(normalize("").is_none());
        assert!(normalize("02912345678").is_none(), "landline prefix 02 is not mobile");
        assert!(normalize("017123456789").is_none(), "12 digits");
    }
}
