use thiserror::Error;

use crate::types::OrderId;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reputation store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Order intelligence already recorded for order {order_id}")]
    IntelligenceExists { order_id: OrderId },

    #[error("Order {order_id} not found")]
    OrderNotFound { order_id: OrderId },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RiskError {
    /// Persistence failures are worth retrying; everything else is a
    /// caller or configuration problem that will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RiskError::Database(_) | RiskError::StoreUnavailable { .. })
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        RiskError::StoreUnavailable {
            reason: format!("{what} lock poisoned"),
        }
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
