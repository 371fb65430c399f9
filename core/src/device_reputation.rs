//! Device fingerprint payloads and the device reputation store.
//!
//! The browser hashes its own fingerprint; this side only ever sees the
//! hash and treats it as an opaque key. The raw payload is kept as
//! descriptive `browser_info` for investigators.

use crate::{
    clock::Clock,
    error::RiskResult,
    repository::ReputationRepository,
    reputation::DeviceReputation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Client-observable environment captured at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceFingerprint {
    pub user_agent:     String,
    pub screen_width:   u32,
    pub screen_height:  u32,
    pub timezone:       String,
    pub language:       String,
    pub platform:       String,
    pub cookie_enabled: bool,
    pub do_not_track:   Option<String>,
}

/// A device hash plus whatever payload accompanied it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignal {
    pub hash:         String,
    #[serde(default)]
    pub browser_info: String,
}

impl DeviceSignal {
    pub fn new(hash: impl Into<String>, browser_info: impl Into<String>) -> Self {
        Self {
            hash:         hash.into().trim().to_string(),
            browser_info: browser_info.into(),
        }
    }

    /// The fingerprint payload is kept, serialized, as `browser_info`.
    pub fn from_fingerprint(hash: impl Into<String>, fp: &DeviceFingerprint) -> RiskResult<Self> {
        Ok(Self::new(hash, serde_json::to_string(fp)?))
    }

    /// Whitespace-only hashes count as no fingerprint at all.
    pub fn is_present(&self) -> bool {
        !self.hash.is_empty()
    }
}

pub struct DeviceReputationStore {
    repo:  Arc<dyn ReputationRepository>,
    clock: Arc<dyn Clock>,
}

impl DeviceReputationStore {
    pub fn new(repo: Arc<dyn ReputationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Stored reputation, or an unsaved zero record for an unseen device.
    pub fn get_reputation(&self, device_hash: &str) -> RiskResult<DeviceReputation> {
        Ok(self
            .repo
            .device(device_hash)?
            .unwrap_or_else(|| DeviceReputation::new(device_hash)))
    }

    /// Count one order against the device. A signal without a hash is
    /// ignored.
    pub fn record_order(&self, signal: &DeviceSignal) -> RiskResult<Option<DeviceReputation>> {
        if !signal.is_present() {
            return Ok(None);
        }
        let now = self.clock.now();
        let rep = self.repo.modify_device(&signal.hash, &mut |rep| {
            rep.count_order(&signal.browser_info, now)
        })?;
        Ok(Some(rep))
    }
}
