//! Client IP resolution and the IP reputation store.

use crate::{
    clock::Clock,
    error::RiskResult,
    repository::ReputationRepository,
    reputation::IpReputation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Proxy headers consulted in priority order, edge CDN first.
const FORWARDING_HEADERS: [&str; 7] = [
    "cf-connecting-ip",
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

const UNKNOWN_IP: &str = "0.0.0.0";

/// What the transport layer knows about the request that placed an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    headers:     HashMap<String, String>,
    #[serde(default)]
    remote_addr: Option<String>,
}

impl ConnectionInfo {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            headers:     HashMap::new(),
            remote_addr: Some(remote_addr.into()),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Header names are matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }
}

/// Pick the client address: the first forwarding header whose leading
/// entry is a public IP wins; otherwise the direct peer address is used
/// as-is, even when it is private.
pub fn resolve_real_ip(conn: &ConnectionInfo) -> String {
    let candidates = FORWARDING_HEADERS
        .iter()
        .filter_map(|name| conn.header(name))
        .chain(conn.remote_addr());

    for value in candidates {
        if let Some(ip) = first_entry(value).and_then(parse_public_ip) {
            return ip.to_string();
        }
    }

    conn.remote_addr()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_IP)
        .to_string()
}

fn first_entry(value: &str) -> Option<&str> {
    let first = value.split(',').next()?.trim();
    // RFC 7239 style: for="1.2.3.4"
    let first = first
        .strip_prefix("for=")
        .or_else(|| first.strip_prefix("For="))
        .unwrap_or(first);
    let first = first.trim_matches('"');
    (!first.is_empty()).then_some(first)
}

fn parse_public_ip(candidate: &str) -> Option<IpAddr> {
    let ip: IpAddr = candidate.parse().ok()?;
    is_public(&ip).then_some(ip)
}

/// Rejects private, loopback, link-local and otherwise reserved ranges.
pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        || a >= 240
        || (a == 100 && (64..128).contains(&b)))
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00   // unique local
        || (first & 0xffc0) == 0xfe80   // link local
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)) // documentation
}

pub struct IpReputationStore {
    repo:  Arc<dyn ReputationRepository>,
    clock: Arc<dyn Clock>,
}

impl IpReputationStore {
    pub fn new(repo: Arc<dyn ReputationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Stored reputation, created (and persisted) on first lookup.
    pub fn get_reputation(&self, ip: &str) -> RiskResult<IpReputation> {
        self.repo.ip_or_create(ip, self.clock.now())
    }

    pub fn record_order(&self, ip: &str) -> RiskResult<IpReputation> {
        let now = self.clock.now();
        self.repo.modify_ip(ip, &mut |rep| rep.count_order(now))
    }

    /// Moderation action. A block pins the score at 100 until lifted.
    pub fn set_blocked(&self, ip: &str, blocked: bool) -> RiskResult<IpReputation> {
        let rep = self.repo.modify_ip(ip, &mut |rep| rep.set_blocked(blocked))?;
        log::info!(
            "ip {ip} {} (risk_score={})",
            if blocked { "blocked" } else { "unblocked" },
            rep.risk_score
        );
        Ok(rep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdn_header_wins_over_forwarded_for() {
        let conn = ConnectionInfo::new("10.0.0.2")
            .with_header("X-Forwarded-For", "198.51.100.20")
            .with_header("CF-Connecting-IP", "203.0.114.7");
        assert_eq!(resolve_real_ip(&conn), "203.0.114.7");
    }

    #[test]
    fn first_entry_of_a_proxy_chain_is_used() {
        let conn = ConnectionInfo::new("10.0.0.2")
            .with_header("x-forwarded-for", " 8.8.8.8 , 10.0.0.1, 172.16.0.1");
        assert_eq!(resolve_real_ip(&conn), "8.8.8.8");
    }

    #[test]
    fn private_header_values_are_skipped() {
        let conn = ConnectionInfo::new("10.0.0.2")
            .with_header("client-ip", "192.168.1.10")
            .with_header("x-forwarded-for", "1.1.1.1");
        assert_eq!(resolve_real_ip(&conn), "1.1.1.1");
    }

    #[test]
    fn falls_back_to_private_peer_address() {
        let conn = ConnectionInfo::new("192.168.0.5")
            .with_header("x-forwarded-for", "not-an-ip");
        assert_eq!(resolve_real_ip(&conn), "192.168.0.5");
        assert_eq!(resolve_real_ip(&ConnectionInfo::default()), "0.0.0.0");
    }

    #[test]
    fn rfc7239_forwarded_value() {
        let conn = ConnectionInfo::new("10.0.0.2").with_header("forwarded", "for=\"9.9.9.9\"");
        assert_eq!(resolve_real_ip(&conn), "9.9.9.9");
    }

    #[test]
    fn deserialized_headers_match_any_case() {
        let conn: ConnectionInfo = serde_json::from_str(
            r#"{"headers": {"X-Forwarded-For": "8.8.4.4, 10.0.0.1"}, "remote_addr": "10.0.0.2"}"#,
        )
        .unwrap();
        assert_eq!(resolve_real_ip(&conn), "8.8.4.4");
    }

    #[test]
    fn reserved_ranges() {
        for ip in ["127.0.0.1", "0.1.2.3", "169.254.1.1", "100.64.0.1", "240.0.0.1", "::1", "fe80::1", "fd00::1", "::ffff:10.0.0.1"] {
            let parsed: IpAddr = ip.parse().unwrap();
            assert!(!is_public(&parsed), "{ip} should not be public");
        }
        for ip in ["8.8.8.8", "2606:4700::1111", "::ffff:8.8.4.4"] {
            let parsed: IpAddr = ip.parse().unwrap();
            assert!(is_public(&parsed), "{ip} should be public");
        }
    }
}
