use crate::{
    error::{RiskError, RiskResult},
    feedback::ReturnReason,
};
use serde::{Deserialize, Serialize};

// ── Composite weights ─────────────────────────────────────────────

/// Per-signal weights for the composite score. Must sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub phone:    u32,
    pub ip:       u32,
    pub device:   u32,
    pub behavior: u32,
    pub address:  u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            phone:    30,
            ip:       20,
            device:   15,
            behavior: 25,
            address:  10,
        }
    }
}

impl RiskWeights {
    pub fn total(&self) -> u32 {
        self.phone + self.ip + self.device + self.behavior + self.address
    }
}

// ── High-risk policy ──────────────────────────────────────────────

/// What the checkout does with an order classified as high risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighRiskAction {
    #[default]
    Flag,
    Block,
    Manual,
}

// ── Delivery feedback ─────────────────────────────────────────────

/// Reputation nudges applied on top of the return-rate score once a
/// courier outcome is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub unreachable:        u8,
    pub wrong_number:       u8,
    pub address_issue:      u8,
    pub incomplete_address: u8,
    pub refused:            u8,
    pub other:              u8,
    /// Penalty for a return reported without any reason.
    pub unspecified:        u8,
    /// Points removed from the phone score on a successful delivery.
    pub delivered_credit:   u8,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            unreachable:        20,
            wrong_number:       25,
            address_issue:      15,
            incomplete_address: 15,
            refused:            10,
            other:              5,
            unspecified:        10,
            delivered_credit:   10,
        }
    }
}

impl FeedbackConfig {
    pub fn penalty_for(&self, reason: Option<ReturnReason>) -> u8 {
        match reason {
            Some(ReturnReason::Unreachable)       => self.unreachable,
            Some(ReturnReason::WrongNumber)       => self.wrong_number,
            Some(ReturnReason::AddressIssue)      => self.address_issue,
            Some(ReturnReason::IncompleteAddress) => self.incomplete_address,
            Some(ReturnReason::Refused)           => self.refused,
            Some(ReturnReason::Other)             => self.other,
            None                                  => self.unspecified,
        }
    }
}

// ── Conversion reporting gate ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub pixel_id:                 Option<String>,
    pub access_token:             Option<String>,
    /// Report only orders that pass the verification checks.
    pub send_verified_only:       bool,
    /// Order totals above this count as verified.
    pub verified_total_threshold: f64,
    /// Minimum phone success rate (percent) that counts as verified.
    pub verified_success_rate:    f64,
    /// Cached risk scores below this count as verified.
    pub verified_max_risk:        u8,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            pixel_id:                 None,
            access_token:             None,
            send_verified_only:       true,
            verified_total_threshold: 5000.0,
            verified_success_rate:    80.0,
            verified_max_risk:        30,
        }
    }
}

impl ConversionConfig {
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.pixel_id) && present(&self.access_token)
    }
}

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Scores at or above this are high risk.
    pub high_threshold:   u8,
    /// Scores at or above this (and below high) are medium risk.
    pub medium_threshold: u8,
    pub weights:          RiskWeights,
    pub high_risk_action: HighRiskAction,
    pub feedback:         FeedbackConfig,
    pub conversion:       ConversionConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_threshold:   70,
            medium_threshold: 40,
            weights:          RiskWeights::default(),
            high_risk_action: HighRiskAction::default(),
            feedback:         FeedbackConfig::default(),
            conversion:       ConversionConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RiskConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RiskResult<()> {
        let total = self.weights.total();
        if total != 100 {
            return Err(RiskError::InvalidConfig {
                reason: format!("weights must sum to 100, got {total}"),
            });
        }
        if self.high_threshold > 100 {
            return Err(RiskError::InvalidConfig {
                reason: format!("high_threshold {} exceeds 100", self.high_threshold),
            });
        }
        if self.medium_threshold >= self.high_threshold {
            return Err(RiskError::InvalidConfig {
                reason: format!(
                    "medium_threshold {} must be below high_threshold {}",
                    self.medium_threshold, self.high_threshold
                ),
            });
        }
        Ok(())
    }
}
