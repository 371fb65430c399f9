//! Checkout-behavior signals and the coarse risk flags derived from them.
//!
//! A zero in any signal means the browser did not measure it; zeros are
//! left out of the average rather than read as "instant".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Score used when no behavior was measured at all.
pub const NEUTRAL_BEHAVIOR_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorSignals {
    /// Seconds spent on the checkout page.
    pub checkout_time:    u32,
    pub pages_viewed:     u32,
    /// Seconds since the session started.
    pub session_duration: u32,
}

impl BehaviorSignals {
    pub fn new(checkout_time: u32, pages_viewed: u32, session_duration: u32) -> Self {
        Self { checkout_time, pages_viewed, session_duration }
    }

    /// Mean of the measured factors, or the neutral score when none were.
    pub fn risk_score(&self) -> u8 {
        let factors: Vec<u32> = [
            checkout_time_score(self.checkout_time),
            pages_viewed_score(self.pages_viewed),
            session_duration_score(self.session_duration),
        ]
        .into_iter()
        .flatten()
        .collect();

        if factors.is_empty() {
            return NEUTRAL_BEHAVIOR_SCORE;
        }
        let mean = factors.iter().sum::<u32>() as f64 / factors.len() as f64;
        (mean.round() as u32).min(100) as u8
    }
}

fn checkout_time_score(secs: u32) -> Option<u32> {
    match secs {
        0        => None,
        1..=59   => Some(80),
        60..=119 => Some(50),
        _        => Some(20),
    }
}

fn pages_viewed_score(pages: u32) -> Option<u32> {
    match pages {
        0     => None,
        1..=2 => Some(70),
        3..=4 => Some(40),
        _     => Some(15),
    }
}

fn session_duration_score(secs: u32) -> Option<u32> {
    match secs {
        0         => None,
        1..=119   => Some(75),
        120..=299 => Some(45),
        _         => Some(20),
    }
}

/// Named flags persisted on the order-intelligence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    InvalidPhone,
    QuickCheckout,
    LowPagesViewed,
    ShortSession,
    IncompleteAddress,
    MissingDevice,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::InvalidPhone      => "invalid_phone",
            RiskFactor::QuickCheckout     => "quick_checkout",
            RiskFactor::LowPagesViewed    => "low_pages_viewed",
            RiskFactor::ShortSession      => "short_session",
            RiskFactor::IncompleteAddress => "incomplete_address",
            RiskFactor::MissingDevice     => "missing_device",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags raised by the behavior signals alone.
pub fn behavior_factors(signals: &BehaviorSignals) -> Vec<RiskFactor> {
    let mut out = Vec::new();
    if (1..60).contains(&signals.checkout_time) {
        out.push(RiskFactor::QuickCheckout);
    }
    if (1..3).contains(&signals.pages_viewed) {
        out.push(RiskFactor::LowPagesViewed);
    }
    if (1..120).contains(&signals.session_duration) {
        out.push(RiskFactor::ShortSession);
    }
    out
}
