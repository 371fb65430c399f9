//! Concurrent writers on one key must not lose updates.
//!
//! Each test hammers a single phone / IP / device from many threads and
//! checks the counters add up, for both repository implementations.

use chrono::{TimeZone, Utc};
use codshield_core::{
    clock::FixedClock,
    config::FeedbackConfig,
    device_reputation::{DeviceReputationStore, DeviceSignal},
    error::RiskError,
    feedback::{DeliveryFeedbackLoop, FeedbackOutcome},
    ip_reputation::IpReputationStore,
    phone_reputation::PhoneReputationStore,
    repository::{MemoryRepository, ReputationRepository, SqliteRepository},
    reputation::OrderIntelligence,
};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()))
}

fn sqlite_file(name: &str) -> Arc<SqliteRepository> {
    let path = std::env::temp_dir().join(format!("codshield-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let repo = SqliteRepository::open(path.to_str().expect("utf-8 temp path")).expect("open sqlite");
    repo.migrate().expect("migrate");
    Arc::new(repo)
}

fn hammer_phone(repo: Arc<dyn ReputationRepository>) {
    let phones = Arc::new(PhoneReputationStore::new(repo.clone(), clock()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let phones = phones.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    // every fifth order comes back
                    let returned = (t * PER_THREAD + i) % 5 == 0;
                    phones.record_order("+8801712345678", returned).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let rep = repo.phone("01712345678").unwrap().unwrap();
    assert_eq!(rep.order_count as usize, THREADS * PER_THREAD, "lost order updates");
    assert_eq!(rep.return_count as usize, THREADS * PER_THREAD / 5, "lost return updates");
    assert_eq!(rep.risk_score, 40, "20% return rate doubles to 40");
}

fn hammer_ip(repo: Arc<dyn ReputationRepository>) {
    let ips = Arc::new(IpReputationStore::new(repo.clone(), clock()));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let ips = ips.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    ips.record_order("203.0.113.9").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let rep = repo.ip("203.0.113.9").unwrap().unwrap();
    assert_eq!(rep.order_count as usize, THREADS * PER_THREAD);
    assert_eq!(rep.risk_score, 100);
}

fn hammer_device(repo: Arc<dyn ReputationRepository>) {
    let devices = Arc::new(DeviceReputationStore::new(repo.clone(), clock()));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let devices = devices.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    devices.record_order(&DeviceSignal::new("a1f3", "Mozilla/5.0")).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let rep = repo.device("a1f3").unwrap().unwrap();
    assert_eq!(rep.order_count as usize, THREADS * PER_THREAD);
    assert_eq!(rep.risk_score, 100);
    assert_eq!(rep.browser_info, "Mozilla/5.0");
}

/// Every thread checks out its own orders twice over shared identifiers;
/// each order is counted once, replays are rejected.
fn race_checkouts(repo: Arc<dyn ReputationRepository>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let repo = repo.clone();
            thread::spawn(move || {
                let mut replays = 0;
                for i in 0..PER_THREAD {
                    let record = OrderIntelligence {
                        order_id:             (t * PER_THREAD + i) as u64,
                        phone:                Some("01712345678".into()),
                        ip_address:           "203.0.113.9".into(),
                        device_hash:          Some("a1f3".into()),
                        checkout_time:        200,
                        pages_viewed:         5,
                        session_duration:     600,
                        address_completeness: 100,
                        risk_factors:         Vec::new(),
                        created_at:           Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
                    };
                    repo.record_checkout(&record, "Mozilla/5.0").unwrap();
                    match repo.record_checkout(&record, "Mozilla/5.0") {
                        Err(RiskError::IntelligenceExists { .. }) => replays += 1,
                        other => panic!("replay must be rejected, got {other:?}"),
                    }
                }
                replays
            })
        })
        .collect();
    let replays: usize = handles
        .into_iter()
        .map(|h| h.join().expect("checkout thread panicked"))
        .sum();

    let total = THREADS * PER_THREAD;
    assert_eq!(replays, total);
    assert_eq!(repo.phone("01712345678").unwrap().unwrap().order_count as usize, total);
    assert_eq!(repo.ip("203.0.113.9").unwrap().unwrap().order_count as usize, total);
    assert_eq!(repo.device("a1f3").unwrap().unwrap().order_count as usize, total);
}

/// Racing duplicate webhooks for one order: exactly one applies.
fn race_duplicate_feedback(repo: Arc<dyn ReputationRepository>) {
    let phones = Arc::new(PhoneReputationStore::new(repo.clone(), clock()));
    let feedback = Arc::new(DeliveryFeedbackLoop::new(phones, FeedbackConfig::default()));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let feedback = feedback.clone();
            thread::spawn(move || {
                feedback
                    .report_delivery_outcome(42, "01812345679", false, None)
                    .unwrap()
            })
        })
        .collect();
    let applied = handles
        .into_iter()
        .map(|h| h.join().expect("webhook thread panicked"))
        .filter(|o| matches!(o, FeedbackOutcome::Applied(_)))
        .count();

    assert_eq!(applied, 1, "duplicate reports must apply exactly once");
    let rep = repo.phone("01812345679").unwrap().unwrap();
    assert_eq!((rep.order_count, rep.return_count), (1, 1));
}

#[test]
fn memory_phone_counters_add_up() {
    hammer_phone(Arc::new(MemoryRepository::new()));
}

#[test]
fn sqlite_phone_counters_add_up() {
    hammer_phone(sqlite_file("phone"));
}

#[test]
fn memory_ip_counters_add_up() {
    hammer_ip(Arc::new(MemoryRepository::new()));
}

#[test]
fn sqlite_ip_counters_add_up() {
    hammer_ip(sqlite_file("ip"));
}

#[test]
fn memory_duplicate_feedback_applies_once() {
    race_duplicate_feedback(Arc::new(MemoryRepository::new()));
}

#[test]
fn sqlite_duplicate_feedback_applies_once() {
    race_duplicate_feedback(sqlite_file("feedback"));
}

#[test]
fn memory_device_counters_add_up() {
    hammer_device(Arc::new(MemoryRepository::new()));
}

#[test]
fn sqlite_device_counters_add_up() {
    hammer_device(sqlite_file("device"));
}

#[test]
fn memory_checkouts_count_once() {
    race_checkouts(Arc::new(MemoryRepository::new()));
}

#[test]
fn sqlite_checkouts_count_once() {
    race_checkouts(sqlite_file("checkout"));
}
