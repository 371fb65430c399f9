//! Time source for reputation and intelligence timestamps.
//!
//! RULE: Nothing in the core calls `Utc::now()` directly.
//! Services take an `Arc<dyn Clock>` so tests can pin time.

use crate::types::Timestamp;
use chrono::Utc;
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time. Used in production wiring.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self { current: Mutex::new(at) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut t) = self.current.lock() {
            *t += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        match self.current.lock() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
