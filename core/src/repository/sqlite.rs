//! SQLite-backed repository.
//!
//! The connection lives behind a mutex, and every read-modify-write runs
//! inside an IMMEDIATE transaction, so overlapping writers on the same
//! key serialize both inside this process and across processes sharing
//! the database file.

use super::{DeliveryRecord, ReputationRepository};
use crate::{
    error::{RiskError, RiskResult},
    feedback::{DeliveryStatus, ReturnReason},
    reputation::{DeviceReputation, IpReputation, OrderIntelligence, PhoneReputation},
    types::{clamp_score, OrderId, Timestamp},
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub struct SqliteRepository {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SqliteRepository {
    pub fn open(path: &str) -> RiskResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Safe to call repeatedly.
    pub fn migrate(&self) -> RiskResult<()> {
        self.conn()?
            .execute_batch(include_str!("../../../migrations/001_reputation.sql"))?;
        Ok(())
    }

    fn conn(&self) -> RiskResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RiskError::poisoned("sqlite connection"))
    }

    // ── Counts (summary / test helpers) ────────────────────────

    pub fn phone_count(&self) -> RiskResult<i64> {
        Ok(self.conn()?.query_row("SELECT COUNT(*) FROM phone_reputation", [], |r| r.get(0))?)
    }

    pub fn intelligence_count(&self) -> RiskResult<i64> {
        Ok(self.conn()?.query_row("SELECT COUNT(*) FROM order_intelligence", [], |r| r.get(0))?)
    }

    /// Phones ordered by descending risk, for run summaries.
    pub fn riskiest_phones(&self, limit: usize) -> RiskResult<Vec<PhoneReputation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT phone, order_count, return_count, risk_score, last_order_date
             FROM phone_reputation
             ORDER BY risk_score DESC, order_count DESC, phone ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], phone_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

// ── Row mapping ───────────────────────────────────────────────────

fn phone_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhoneReputation> {
    Ok(PhoneReputation {
        phone:           row.get(0)?,
        order_count:     row.get::<_, i64>(1)? as u32,
        return_count:    row.get::<_, i64>(2)? as u32,
        risk_score:      clamp_score(row.get(3)?),
        last_order_date: row.get(4)?,
    })
}

fn ip_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IpReputation> {
    Ok(IpReputation {
        ip_address:      row.get(0)?,
        order_count:     row.get::<_, i64>(1)? as u32,
        risk_score:      clamp_score(row.get(2)?),
        blocked:         row.get::<_, i32>(3)? != 0,
        last_order_date: row.get(4)?,
    })
}

fn device_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceReputation> {
    Ok(DeviceReputation {
        device_hash:     row.get(0)?,
        browser_info:    row.get(1)?,
        order_count:     row.get::<_, i64>(2)? as u32,
        risk_score:      clamp_score(row.get(3)?),
        last_order_date: row.get(4)?,
    })
}

fn load_phone(conn: &Connection, phone: &str) -> RiskResult<Option<PhoneReputation>> {
    Ok(conn
        .query_row(
            "SELECT phone, order_count, return_count, risk_score, last_order_date
             FROM phone_reputation WHERE phone = ?1",
            params![phone],
            phone_from_row,
        )
        .optional()?)
}

fn save_phone(conn: &Connection, rep: &PhoneReputation) -> RiskResult<()> {
    conn.execute(
        "INSERT INTO phone_reputation (phone, order_count, return_count, risk_score, last_order_date)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(phone) DO UPDATE SET
            order_count     = excluded.order_count,
            return_count    = excluded.return_count,
            risk_score      = excluded.risk_score,
            last_order_date = excluded.last_order_date",
        params![
            rep.phone,
            rep.order_count as i64,
            rep.return_count as i64,
            rep.risk_score as i64,
            rep.last_order_date,
        ],
    )?;
    Ok(())
}

fn load_ip(conn: &Connection, ip: &str) -> RiskResult<Option<IpReputation>> {
    Ok(conn
        .query_row(
            "SELECT ip_address, order_count, risk_score, blocked, last_order_date
             FROM ip_reputation WHERE ip_address = ?1",
            params![ip],
            ip_from_row,
        )
        .optional()?)
}

fn save_ip(conn: &Connection, rep: &IpReputation) -> RiskResult<()> {
    conn.execute(
        "INSERT INTO ip_reputation (ip_address, order_count, risk_score, blocked, last_order_date)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(ip_address) DO UPDATE SET
            order_count     = excluded.order_count,
            risk_score      = excluded.risk_score,
            blocked         = excluded.blocked,
            last_order_date = excluded.last_order_date",
        params![
            rep.ip_address,
            rep.order_count as i64,
            rep.risk_score as i64,
            if rep.blocked { 1 } else { 0 },
            rep.last_order_date,
        ],
    )?;
    Ok(())
}

fn load_device(conn: &Connection, hash: &str) -> RiskResult<Option<DeviceReputation>> {
    Ok(conn
        .query_row(
            "SELECT device_hash, browser_info, order_count, risk_score, last_order_date
             FROM device_reputation WHERE device_hash = ?1",
            params![hash],
            device_from_row,
        )
        .optional()?)
}

fn save_device(conn: &Connection, rep: &DeviceReputation) -> RiskResult<()> {
    conn.execute(
        "INSERT INTO device_reputation (device_hash, browser_info, order_count, risk_score, last_order_date)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(device_hash) DO UPDATE SET
            browser_info    = excluded.browser_info,
            order_count     = excluded.order_count,
            risk_score      = excluded.risk_score,
            last_order_date = excluded.last_order_date",
        params![
            rep.device_hash,
            rep.browser_info,
            rep.order_count as i64,
            rep.risk_score as i64,
            rep.last_order_date,
        ],
    )?;
    Ok(())
}

/// Write-once insert. An existing row is left untouched.
fn claim_order(conn: &Connection, record: &OrderIntelligence) -> RiskResult<()> {
    let factors = serde_json::to_string(&record.risk_factors)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO order_intelligence (
            order_id, phone, ip_address, device_hash, checkout_time, pages_viewed,
            session_duration, address_completeness, risk_factors, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.order_id as i64,
            record.phone,
            record.ip_address,
            record.device_hash,
            record.checkout_time as i64,
            record.pages_viewed as i64,
            record.session_duration as i64,
            record.address_completeness as i64,
            factors,
            record.created_at,
        ],
    )?;
    if inserted == 0 {
        return Err(RiskError::IntelligenceExists { order_id: record.order_id });
    }
    Ok(())
}

fn load_delivery(conn: &Connection, order_id: OrderId) -> RiskResult<Option<DeliveryRecord>> {
    let raw = conn
        .query_row(
            "SELECT order_id, phone, status, return_reason, reported_at
             FROM delivery_outcome WHERE order_id = ?1",
            params![order_id as i64],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Timestamp>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((order_id, phone, status, reason, reported_at)) = raw else {
        return Ok(None);
    };
    let status: DeliveryStatus = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let return_reason = reason
        .map(|r| r.parse::<ReturnReason>())
        .transpose()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    Ok(Some(DeliveryRecord {
        order_id: order_id as OrderId,
        phone,
        status,
        return_reason,
        reported_at,
    }))
}

// ── Trait impl ────────────────────────────────────────────────────

impl ReputationRepository for SqliteRepository {
    fn phone(&self, phone: &str) -> RiskResult<Option<PhoneReputation>> {
        load_phone(&*self.conn()?, phone)
    }

    fn phone_or_create(&self, phone: &str, now: Timestamp) -> RiskResult<PhoneReputation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rep = match load_phone(&tx, phone)? {
            Some(existing) => existing,
            None => {
                let mut fresh = PhoneReputation::new(phone);
                fresh.last_order_date = Some(now);
                save_phone(&tx, &fresh)?;
                fresh
            }
        };
        tx.commit()?;
        Ok(rep)
    }

    fn modify_phone(
        &self,
        phone: &str,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<PhoneReputation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut rep = load_phone(&tx, phone)?.unwrap_or_else(|| PhoneReputation::new(phone));
        update(&mut rep);
        save_phone(&tx, &rep)?;
        tx.commit()?;
        Ok(rep)
    }

    fn ip(&self, ip: &str) -> RiskResult<Option<IpReputation>> {
        load_ip(&*self.conn()?, ip)
    }

    fn ip_or_create(&self, ip: &str, now: Timestamp) -> RiskResult<IpReputation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rep = match load_ip(&tx, ip)? {
            Some(existing) => existing,
            None => {
                let mut fresh = IpReputation::new(ip);
                fresh.last_order_date = Some(now);
                save_ip(&tx, &fresh)?;
                fresh
            }
        };
        tx.commit()?;
        Ok(rep)
    }

    fn modify_ip(
        &self,
        ip: &str,
        update: &mut dyn FnMut(&mut IpReputation),
    ) -> RiskResult<IpReputation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut rep = load_ip(&tx, ip)?.unwrap_or_else(|| IpReputation::new(ip));
        update(&mut rep);
        save_ip(&tx, &rep)?;
        tx.commit()?;
        Ok(rep)
    }

    fn device(&self, device_hash: &str) -> RiskResult<Option<DeviceReputation>> {
        load_device(&*self.conn()?, device_hash)
    }

    fn modify_device(
        &self,
        device_hash: &str,
        update: &mut dyn FnMut(&mut DeviceReputation),
    ) -> RiskResult<DeviceReputation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut rep = load_device(&tx, device_hash)?
            .unwrap_or_else(|| DeviceReputation::new(device_hash));
        update(&mut rep);
        save_device(&tx, &rep)?;
        tx.commit()?;
        Ok(rep)
    }

    fn insert_intelligence(&self, record: &OrderIntelligence) -> RiskResult<()> {
        claim_order(&*self.conn()?, record)
    }

    fn record_checkout(&self, record: &OrderIntelligence, browser_info: &str) -> RiskResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let at = record.created_at;

        claim_order(&tx, record)?;

        if let Some(phone) = record.phone.as_deref() {
            let mut rep = load_phone(&tx, phone)?.unwrap_or_else(|| PhoneReputation::new(phone));
            rep.count_order(false, at);
            save_phone(&tx, &rep)?;
        }

        let mut ip = load_ip(&tx, &record.ip_address)?
            .unwrap_or_else(|| IpReputation::new(record.ip_address.as_str()));
        ip.count_order(at);
        save_ip(&tx, &ip)?;

        if let Some(hash) = record.device_hash.as_deref() {
            let mut rep = load_device(&tx, hash)?.unwrap_or_else(|| DeviceReputation::new(hash));
            rep.count_order(browser_info, at);
            save_device(&tx, &rep)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn intelligence(&self, order_id: OrderId) -> RiskResult<Option<OrderIntelligence>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT order_id, phone, ip_address, device_hash, checkout_time, pages_viewed,
                        session_duration, address_completeness, risk_factors, created_at
                 FROM order_intelligence WHERE order_id = ?1",
                params![order_id as i64],
                |r| {
                    Ok((
                        OrderIntelligence {
                            order_id:             r.get::<_, i64>(0)? as OrderId,
                            phone:                r.get(1)?,
                            ip_address:           r.get(2)?,
                            device_hash:          r.get(3)?,
                            checkout_time:        r.get::<_, i64>(4)? as u32,
                            pages_viewed:         r.get::<_, i64>(5)? as u32,
                            session_duration:     r.get::<_, i64>(6)? as u32,
                            address_completeness: clamp_score(r.get(7)?),
                            risk_factors:         Vec::new(),
                            created_at:           r.get(9)?,
                        },
                        r.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        match raw {
            Some((mut record, factors)) => {
                record.risk_factors = serde_json::from_str(&factors)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn delivery(&self, order_id: OrderId) -> RiskResult<Option<DeliveryRecord>> {
        load_delivery(&*self.conn()?, order_id)
    }

    fn transition_delivery(
        &self,
        record: &DeliveryRecord,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<Option<PhoneReputation>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if load_delivery(&tx, record.order_id)?
            .is_some_and(|prev| prev.status == record.status)
        {
            return Ok(None); // dropping tx rolls back the (empty) transaction
        }

        let mut rep = load_phone(&tx, &record.phone)?
            .unwrap_or_else(|| PhoneReputation::new(record.phone.as_str()));
        update(&mut rep);
        save_phone(&tx, &rep)?;

        tx.execute(
            "INSERT INTO delivery_outcome (order_id, phone, status, return_reason, reported_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(order_id) DO UPDATE SET
                phone         = excluded.phone,
                status        = excluded.status,
                return_reason = excluded.return_reason,
                reported_at   = excluded.reported_at",
            params![
                record.order_id as i64,
                record.phone,
                record.status.as_str(),
                record.return_reason.map(|r| r.as_str()),
                record.reported_at,
            ],
        )?;
        tx.commit()?;
        Ok(Some(rep))
    }
}
