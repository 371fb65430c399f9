//! Persistence capability for the reputation core.
//!
//! RULE: Only repository implementations touch storage.
//! Stores and services call these methods; they never run SQL or
//! lock maps themselves.
//!
//! Every `modify_*` call and `transition_delivery` is one atomic
//! read-modify-write over a single key: load-or-default, apply the
//! closure, upsert. Two overlapping calls for the same key serialize.
//! `record_checkout` spans several keys and is atomic as a whole.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::{
    error::RiskResult,
    feedback::{DeliveryStatus, ReturnReason},
    reputation::{DeviceReputation, IpReputation, OrderIntelligence, PhoneReputation},
    types::{OrderId, Timestamp},
};

/// Last courier outcome recorded against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub order_id:      OrderId,
    pub phone:         String,
    pub status:        DeliveryStatus,
    pub return_reason: Option<ReturnReason>,
    pub reported_at:   Timestamp,
}

pub trait ReputationRepository: Send + Sync {
    // ── Phone ──────────────────────────────────────────────────

    fn phone(&self, phone: &str) -> RiskResult<Option<PhoneReputation>>;

    /// Return the stored record, persisting a zeroed one on first sight.
    fn phone_or_create(&self, phone: &str, now: Timestamp) -> RiskResult<PhoneReputation>;

    fn modify_phone(
        &self,
        phone: &str,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<PhoneReputation>;

    // ── IP ─────────────────────────────────────────────────────

    fn ip(&self, ip: &str) -> RiskResult<Option<IpReputation>>;

    fn ip_or_create(&self, ip: &str, now: Timestamp) -> RiskResult<IpReputation>;

    fn modify_ip(
        &self,
        ip: &str,
        update: &mut dyn FnMut(&mut IpReputation),
    ) -> RiskResult<IpReputation>;

    // ── Device ─────────────────────────────────────────────────

    fn device(&self, device_hash: &str) -> RiskResult<Option<DeviceReputation>>;

    fn modify_device(
        &self,
        device_hash: &str,
        update: &mut dyn FnMut(&mut DeviceReputation),
    ) -> RiskResult<DeviceReputation>;

    // ── Order intelligence ─────────────────────────────────────

    /// Write-once. Fails with `IntelligenceExists` on a second insert.
    fn insert_intelligence(&self, record: &OrderIntelligence) -> RiskResult<()>;

    fn intelligence(&self, order_id: OrderId) -> RiskResult<Option<OrderIntelligence>>;

    /// Claim the order and count it against the record's phone, IP and
    /// device (when present) in one atomic step. Either all four writes
    /// land or none do. Fails with `IntelligenceExists`, writing nothing,
    /// when the order is already claimed.
    fn record_checkout(&self, record: &OrderIntelligence, browser_info: &str) -> RiskResult<()>;

    // ── Delivery outcomes ──────────────────────────────────────

    fn delivery(&self, order_id: OrderId) -> RiskResult<Option<DeliveryRecord>>;

    /// Record `record` as the order's latest outcome and apply `update`
    /// to the phone, unless the order already carries the same status.
    /// Returns None for a repeated status (nothing written).
    fn transition_delivery(
        &self,
        record: &DeliveryRecord,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<Option<PhoneReputation>>;
}
