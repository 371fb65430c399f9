//! Shared primitive types used across the risk core.

use serde::{Deserialize, Serialize};

/// Identifier assigned to an order by the commerce platform.
pub type OrderId = u64;

/// Any persisted timestamp.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The three reputation key-spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationKind {
    Phone,
    Ip,
    Device,
}

impl ReputationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationKind::Phone  => "phone",
            ReputationKind::Ip     => "ip",
            ReputationKind::Device => "device",
        }
    }
}

impl std::str::FromStr for ReputationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone"  => Ok(ReputationKind::Phone),
            "ip"     => Ok(ReputationKind::Ip),
            "device" => Ok(ReputationKind::Device),
            other    => Err(format!("unknown reputation kind '{other}'")),
        }
    }
}

/// Clamp any intermediate score into the persisted [0, 100] range.
pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}
