//! Deterministic synthetic COD traffic.
//!
//! RULE: The runner never calls a platform RNG. Every draw comes from one
//! Pcg64Mcg stream per concern, derived from the master seed, so the
//! same `--seed` replays the same checkouts and the same courier outcomes.

use codshield_core::{
    address::ShippingAddress,
    behavior::BehaviorSignals,
    device_reputation::DeviceSignal,
    feedback::ReturnReason,
    intelligence::CheckoutContext,
    ip_reputation::ConnectionInfo,
    order::CodOrder,
    types::OrderId,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Stable stream indices. Never renumber.
#[derive(Debug, Clone, Copy)]
pub enum Stream {
    Checkout = 0,
    Courier  = 1,
}

pub fn stream(master_seed: u64, stream: Stream) -> Pcg64Mcg {
    let derived = master_seed ^ (stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    Pcg64Mcg::seed_from_u64(derived)
}

const PHONES: &[&str] = &[
    "01712345678",
    "+8801812345679",
    "8801912345680",
    "01512345681",
    "01612345682",
    "01312345683",
    "017-1234-5684",
    "12345",
];

const IPS: &[&str] = &[
    "203.0.113.10",
    "203.0.113.11",
    "198.51.100.7",
    "198.51.100.8",
    "192.0.2.44",
];

const DEVICES: &[&str] = &["a1f3", "b2e4", "c3d5", "d4c6", ""];

const ADDRESSES: &[(&str, &str, &str, &str)] = &[
    ("House 12, Road 5, Block C", "Flat 3B", "Dhaka", "1205"),
    ("Road 7, Sector 4", "", "Uttara", "1230"),
    ("Near big mosque", "", "Sylhet", ""),
    ("12", "", "X", "12"),
    ("Village Char Kukri, Union 3", "", "Bhola", "8300"),
];

const REASONS: &[ReturnReason] = &[
    ReturnReason::Unreachable,
    ReturnReason::WrongNumber,
    ReturnReason::AddressIssue,
    ReturnReason::IncompleteAddress,
    ReturnReason::Refused,
    ReturnReason::Other,
];

fn pick<'a, T>(rng: &mut Pcg64Mcg, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

/// One synthetic checkout: the order as the platform stores it plus what
/// the storefront observed.
pub fn checkout(rng: &mut Pcg64Mcg, order_id: OrderId) -> (CodOrder, CheckoutContext) {
    let (a1, a2, city, postcode) = *pick(rng, ADDRESSES);
    let address = ShippingAddress::new(a1, a2, city, postcode);
    let total = rng.gen_range(300.0..9000.0_f64).round();
    let order = CodOrder::new(order_id, *pick(rng, PHONES), address, total);

    // Bots check out fast and browse little; humans linger.
    let behavior = if rng.gen_bool(0.25) {
        BehaviorSignals::new(rng.gen_range(5..60), rng.gen_range(1..3), rng.gen_range(10..120))
    } else if rng.gen_bool(0.1) {
        BehaviorSignals::default()
    } else {
        BehaviorSignals::new(rng.gen_range(60..400), rng.gen_range(3..15), rng.gen_range(120..1800))
    };

    let device_hash = *pick(rng, DEVICES);
    // Storefront sits behind a private load balancer.
    let conn = ConnectionInfo::new("10.0.0.1")
        .with_header("X-Forwarded-For", format!("{}, 10.0.0.7", pick(rng, IPS)));
    let device = DeviceSignal::new(device_hash, "Mozilla/5.0 (Linux; Android 13)");
    (order, CheckoutContext::from_connection(&conn, device, behavior))
}

/// Courier outcome for a dispatched order: None when still in transit.
pub fn courier_outcome(rng: &mut Pcg64Mcg, risk_score: u8) -> Option<(bool, Option<ReturnReason>)> {
    if rng.gen_bool(0.2) {
        return None;
    }
    // Riskier orders come back more often.
    let p_return = 0.1 + risk_score as f64 / 100.0 * 0.6;
    if rng.gen_bool(p_return.min(0.95)) {
        let reason = rng.gen_bool(0.85).then(|| *pick(rng, REASONS));
        Some((false, reason))
    } else {
        Some((true, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_traffic() {
        let mut a = stream(7, Stream::Checkout);
        let mut b = stream(7, Stream::Checkout);
        for id in 1..=20 {
            let (oa, ca) = checkout(&mut a, id);
            let (ob, cb) = checkout(&mut b, id);
            assert_eq!(oa, ob, "order {id} diverged");
            assert_eq!(ca.ip, cb.ip);
            assert_eq!(ca.behavior, cb.behavior);
        }
    }

    #[test]
    fn client_ip_is_resolved_past_the_proxy() {
        let mut rng = stream(3, Stream::Checkout);
        for id in 1..=20 {
            let (_, ctx) = checkout(&mut rng, id);
            assert!(IPS.contains(&ctx.ip.as_str()), "unexpected ip {}", ctx.ip);
        }
    }

    #[test]
    fn streams_are_independent() {
        let mut checkout_rng = stream(7, Stream::Checkout);
        let mut courier_rng = stream(7, Stream::Courier);
        let x: u64 = checkout_rng.gen();
        let y: u64 = courier_rng.gen();
        assert_ne!(x, y, "streams must not share a seed");
    }
}
