//! Reputation records for the three key-spaces, the per-order
//! intelligence record, and the risk curves that derive a record's score
//! from its counters.
//!
//! Scores are integers in [0, 100]; higher means riskier.

use crate::types::{clamp_score, OrderId, ReputationKind, Timestamp};
use serde::{Deserialize, Serialize};

// ── Phone ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneReputation {
    pub phone:           String,
    pub order_count:     u32,
    pub return_count:    u32,
    pub risk_score:      u8,
    pub last_order_date: Option<Timestamp>,
}

impl PhoneReputation {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone:           phone.into(),
            order_count:     0,
            return_count:    0,
            risk_score:      0,
            last_order_date: None,
        }
    }

    /// Count one more order and re-derive the score from the return rate.
    pub fn count_order(&mut self, is_returned: bool, at: Timestamp) {
        self.order_count = self.order_count.saturating_add(1);
        if is_returned {
            self.return_count = (self.return_count + 1).min(self.order_count);
        }
        self.risk_score = phone_score(self.order_count, self.return_count);
        self.last_order_date = Some(at);
    }

    /// Shift the score by `delta` points, clamped to [0, 100].
    pub fn nudge(&mut self, delta: i64) {
        self.risk_score = clamp_score(self.risk_score as i64 + delta);
    }

    /// Share of orders that came back, as a percentage.
    pub fn return_rate(&self) -> f64 {
        if self.order_count == 0 {
            return 0.0;
        }
        self.return_count as f64 / self.order_count as f64 * 100.0
    }

    /// Share of orders that were not returned, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.order_count == 0 {
            return 0.0;
        }
        100.0 - self.return_rate()
    }
}

/// Return rate doubled, capped at 100.
pub fn phone_score(order_count: u32, return_count: u32) -> u8 {
    if order_count == 0 {
        return 0;
    }
    let rate = return_count as f64 / order_count as f64 * 100.0;
    clamp_score((rate * 2.0).round() as i64)
}

// ── IP ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpReputation {
    pub ip_address:      String,
    pub order_count:     u32,
    pub risk_score:      u8,
    pub blocked:         bool,
    pub last_order_date: Option<Timestamp>,
}

impl IpReputation {
    pub fn new(ip_address: impl Into<String>) -> Self {
        let mut rep = Self {
            ip_address:      ip_address.into(),
            order_count:     0,
            risk_score:      0,
            blocked:         false,
            last_order_date: None,
        };
        rep.rescore();
        rep
    }

    pub fn count_order(&mut self, at: Timestamp) {
        self.order_count = self.order_count.saturating_add(1);
        self.last_order_date = Some(at);
        self.rescore();
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
        self.rescore();
    }

    /// A block is definitive; otherwise the order-count curve applies.
    pub fn rescore(&mut self) {
        self.risk_score = if self.blocked { 100 } else { ip_score(self.order_count) };
    }
}

/// Order-volume curve for a single IP.
pub fn ip_score(order_count: u32) -> u8 {
    match order_count {
        0     => 20,
        1     => 30,
        2..=3 => 50,
        n     => clamp_score(n as i64 * 15),
    }
}

// ── Device ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReputation {
    pub device_hash:     String,
    pub browser_info:    String,
    pub order_count:     u32,
    pub risk_score:      u8,
    pub last_order_date: Option<Timestamp>,
}

impl DeviceReputation {
    pub fn new(device_hash: impl Into<String>) -> Self {
        Self {
            device_hash:     device_hash.into(),
            browser_info:    String::new(),
            order_count:     0,
            risk_score:      0,
            last_order_date: None,
        }
    }

    pub fn count_order(&mut self, browser_info: &str, at: Timestamp) {
        self.order_count = self.order_count.saturating_add(1);
        self.risk_score = device_score(self.order_count);
        if !browser_info.is_empty() {
            self.browser_info = browser_info.to_string();
        }
        self.last_order_date = Some(at);
    }
}

/// Eight points per order, no decay.
pub fn device_score(order_count: u32) -> u8 {
    clamp_score(order_count as i64 * 8)
}

// ── Order intelligence ────────────────────────────────────────────

/// Immutable snapshot of everything observed at checkout for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntelligence {
    pub order_id:             OrderId,
    /// Normalized phone, or None when the buyer's phone did not normalize.
    pub phone:                Option<String>,
    pub ip_address:           String,
    /// None when the checkout carried no fingerprint.
    pub device_hash:          Option<String>,
    pub checkout_time:        u32,
    pub pages_viewed:         u32,
    pub session_duration:     u32,
    pub address_completeness: u8,
    pub risk_factors:         Vec<String>,
    pub created_at:           Timestamp,
}

// ── Unified view ──────────────────────────────────────────────────

/// Any reputation record, as returned by `get_reputation(kind, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReputationRecord {
    Phone(PhoneReputation),
    Ip(IpReputation),
    Device(DeviceReputation),
}

impl ReputationRecord {
    pub fn kind(&self) -> ReputationKind {
        match self {
            ReputationRecord::Phone(_)  => ReputationKind::Phone,
            ReputationRecord::Ip(_)     => ReputationKind::Ip,
            ReputationRecord::Device(_) => ReputationKind::Device,
        }
    }

    pub fn risk_score(&self) -> u8 {
        match self {
            ReputationRecord::Phone(r)  => r.risk_score,
            ReputationRecord::Ip(r)     => r.risk_score,
            ReputationRecord::Device(r) => r.risk_score,
        }
    }

    pub fn order_count(&self) -> u32 {
        match self {
            ReputationRecord::Phone(r)  => r.order_count,
            ReputationRecord::Ip(r)     => r.order_count,
            ReputationRecord::Device(r) => r.order_count,
        }
    }
}
