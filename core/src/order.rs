//! The order-management collaborator, seen from the risk core.
//!
//! The core reads billing details from an order and writes back its own
//! output fields (`risk_score`, `risk_level`, `risk_breakdown`). Order
//! creation, line items and payment are the platform's business.

use crate::{
    address::ShippingAddress,
    error::{RiskError, RiskResult},
    feedback::{DeliveryStatus, ReturnReason},
    risk_engine::{RiskAssessment, RiskLevel},
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const COD_PAYMENT_METHOD: &str = "cod";

/// Result of a marketplace vendor overriding the risk verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodOrder {
    pub order_id:        OrderId,
    pub payment_method:  String,
    pub billing_phone:   String,
    pub billing_address: ShippingAddress,
    pub total:           f64,

    // ── Written by the risk core ───────────────────────────────
    #[serde(default)]
    pub risk_score:      Option<u8>,
    #[serde(default)]
    pub risk_level:      Option<RiskLevel>,
    /// JSON-serialized `RiskAssessment`.
    #[serde(default)]
    pub risk_breakdown:  Option<String>,

    // ── Supplied by couriers / vendors ─────────────────────────
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default)]
    pub return_reason:   Option<ReturnReason>,
    #[serde(default)]
    pub vendor_override: Option<OverrideOutcome>,
}

impl CodOrder {
    pub fn new(
        order_id:        OrderId,
        billing_phone:   impl Into<String>,
        billing_address: ShippingAddress,
        total:           f64,
    ) -> Self {
        Self {
            order_id,
            payment_method: COD_PAYMENT_METHOD.into(),
            billing_phone: billing_phone.into(),
            billing_address,
            total,
            risk_score: None,
            risk_level: None,
            risk_breakdown: None,
            delivery_status: None,
            return_reason: None,
            vendor_override: None,
        }
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = method.into();
        self
    }

    pub fn is_cod(&self) -> bool {
        self.payment_method.eq_ignore_ascii_case(COD_PAYMENT_METHOD)
    }
}

pub trait OrderBook: Send + Sync {
    fn order(&self, order_id: OrderId) -> RiskResult<Option<CodOrder>>;

    /// Cache the assessment onto the order's risk fields.
    fn save_assessment(&self, order_id: OrderId, assessment: &RiskAssessment) -> RiskResult<()>;

    fn set_delivery(
        &self,
        order_id: OrderId,
        status:   DeliveryStatus,
        reason:   Option<ReturnReason>,
    ) -> RiskResult<()>;
}

/// In-process order book. Used by the runner and tests.
#[derive(Debug, Default)]
pub struct MemoryOrderBook {
    orders: Mutex<HashMap<OrderId, CodOrder>>,
}

impl MemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: CodOrder) -> RiskResult<()> {
        self.with_orders(|orders| {
            orders.insert(order.order_id, order);
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.orders.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_orders<T>(
        &self,
        f: impl FnOnce(&mut HashMap<OrderId, CodOrder>) -> RiskResult<T>,
    ) -> RiskResult<T> {
        let mut orders = self.orders.lock().map_err(|_| RiskError::poisoned("order book"))?;
        f(&mut orders)
    }
}

impl OrderBook for MemoryOrderBook {
    fn order(&self, order_id: OrderId) -> RiskResult<Option<CodOrder>> {
        self.with_orders(|orders| Ok(orders.get(&order_id).cloned()))
    }

    fn save_assessment(&self, order_id: OrderId, assessment: &RiskAssessment) -> RiskResult<()> {
        let breakdown = assessment.to_json()?;
        self.with_orders(|orders| {
            let order = orders
                .get_mut(&order_id)
                .ok_or(RiskError::OrderNotFound { order_id })?;
            order.risk_score = Some(assessment.total_score);
            order.risk_level = Some(assessment.risk_level);
            order.risk_breakdown = Some(breakdown);
            Ok(())
        })
    }

    fn set_delivery(
        &self,
        order_id: OrderId,
        status:   DeliveryStatus,
        reason:   Option<ReturnReason>,
    ) -> RiskResult<()> {
        self.with_orders(|orders| {
            let order = orders
                .get_mut(&order_id)
                .ok_or(RiskError::OrderNotFound { order_id })?;
            order.delivery_status = Some(status);
            order.return_reason = reason;
            Ok(())
        })
    }
}
