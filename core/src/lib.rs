//! codshield-core: fraud-risk scoring and reputation tracking for
//! cash-on-delivery checkouts.

pub mod address;
pub mod behavior;
pub mod clock;
pub mod config;
pub mod device_reputation;
pub mod error;
pub mod feedback;
pub mod intelligence;
pub mod ip_reputation;
pub mod order;
pub mod phone_reputation;
pub mod pipeline;
pub mod repository;
pub mod reputation;
pub mod risk_engine;
pub mod types;
pub mod verification;
