//! In-process repository backed by locked hash maps.
//!
//! Lock order when several maps are held: deliveries, intelligence,
//! phones, ips, devices.

use super::{DeliveryRecord, ReputationRepository};
use crate::{
    error::{RiskError, RiskResult},
    reputation::{DeviceReputation, IpReputation, OrderIntelligence, PhoneReputation},
    types::{OrderId, Timestamp},
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    phones:       Mutex<HashMap<String, PhoneReputation>>,
    ips:          Mutex<HashMap<String, IpReputation>>,
    devices:      Mutex<HashMap<String, DeviceReputation>>,
    intelligence: Mutex<HashMap<OrderId, OrderIntelligence>>,
    deliveries:   Mutex<HashMap<OrderId, DeliveryRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> RiskResult<MutexGuard<'a, T>> {
    m.lock().map_err(|_| RiskError::poisoned(what))
}

impl ReputationRepository for MemoryRepository {
    fn phone(&self, phone: &str) -> RiskResult<Option<PhoneReputation>> {
        Ok(lock(&self.phones, "phones")?.get(phone).cloned())
    }

    fn phone_or_create(&self, phone: &str, now: Timestamp) -> RiskResult<PhoneReputation> {
        let mut phones = lock(&self.phones, "phones")?;
        let rep = phones.entry(phone.to_string()).or_insert_with(|| {
            let mut fresh = PhoneReputation::new(phone);
            fresh.last_order_date = Some(now);
            fresh
        });
        Ok(rep.clone())
    }

    fn modify_phone(
        &self,
        phone: &str,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<PhoneReputation> {
        let mut phones = lock(&self.phones, "phones")?;
        let rep = phones
            .entry(phone.to_string())
            .or_insert_with(|| PhoneReputation::new(phone));
        update(rep);
        Ok(rep.clone())
    }

    fn ip(&self, ip: &str) -> RiskResult<Option<IpReputation>> {
        Ok(lock(&self.ips, "ips")?.get(ip).cloned())
    }

    fn ip_or_create(&self, ip: &str, now: Timestamp) -> RiskResult<IpReputation> {
        let mut ips = lock(&self.ips, "ips")?;
        let rep = ips.entry(ip.to_string()).or_insert_with(|| {
            let mut fresh = IpReputation::new(ip);
            fresh.last_order_date = Some(now);
            fresh
        });
        Ok(rep.clone())
    }

    fn modify_ip(
        &self,
        ip: &str,
        update: &mut dyn FnMut(&mut IpReputation),
    ) -> RiskResult<IpReputation> {
        let mut ips = lock(&self.ips, "ips")?;
        let rep = ips
            .entry(ip.to_string())
            .or_insert_with(|| IpReputation::new(ip));
        update(rep);
        Ok(rep.clone())
    }

    fn device(&self, device_hash: &str) -> RiskResult<Option<DeviceReputation>> {
        Ok(lock(&self.devices, "devices")?.get(device_hash).cloned())
    }

    fn modify_device(
        &self,
        device_hash: &str,
        update: &mut dyn FnMut(&mut DeviceReputation),
    ) -> RiskResult<DeviceReputation> {
        let mut devices = lock(&self.devices, "devices")?;
        let rep = devices
            .entry(device_hash.to_string())
            .or_insert_with(|| DeviceReputation::new(device_hash));
        update(rep);
        Ok(rep.clone())
    }

    fn insert_intelligence(&self, record: &OrderIntelligence) -> RiskResult<()> {
        let mut intel = lock(&self.intelligence, "intelligence")?;
        if intel.contains_key(&record.order_id) {
            return Err(RiskError::IntelligenceExists { order_id: record.order_id });
        }
        intel.insert(record.order_id, record.clone());
        Ok(())
    }

    fn record_checkout(&self, record: &OrderIntelligence, browser_info: &str) -> RiskResult<()> {
        // All locks before the first write.
        let mut intel = lock(&self.intelligence, "intelligence")?;
        let mut phones = lock(&self.phones, "phones")?;
        let mut ips = lock(&self.ips, "ips")?;
        let mut devices = lock(&self.devices, "devices")?;

        if intel.contains_key(&record.order_id) {
            return Err(RiskError::IntelligenceExists { order_id: record.order_id });
        }
        let at = record.created_at;

        if let Some(phone) = record.phone.as_deref() {
            phones
                .entry(phone.to_string())
                .or_insert_with(|| PhoneReputation::new(phone))
                .count_order(false, at);
        }
        ips.entry(record.ip_address.clone())
            .or_insert_with(|| IpReputation::new(record.ip_address.as_str()))
            .count_order(at);
        if let Some(hash) = record.device_hash.as_deref() {
            devices
                .entry(hash.to_string())
                .or_insert_with(|| DeviceReputation::new(hash))
                .count_order(browser_info, at);
        }
        intel.insert(record.order_id, record.clone());
        Ok(())
    }

    fn intelligence(&self, order_id: OrderId) -> RiskResult<Option<OrderIntelligence>> {
        Ok(lock(&self.intelligence, "intelligence")?.get(&order_id).cloned())
    }

    fn delivery(&self, order_id: OrderId) -> RiskResult<Option<DeliveryRecord>> {
        Ok(lock(&self.deliveries, "deliveries")?.get(&order_id).cloned())
    }

    fn transition_delivery(
        &self,
        record: &DeliveryRecord,
        update: &mut dyn FnMut(&mut PhoneReputation),
    ) -> RiskResult<Option<PhoneReputation>> {
        let mut deliveries = lock(&self.deliveries, "deliveries")?;
        if deliveries
            .get(&record.order_id)
            .is_some_and(|prev| prev.status == record.status)
        {
            return Ok(None);
        }

        let mut phones = lock(&self.phones, "phones")?;
        let rep = phones
            .entry(record.phone.clone())
            .or_insert_with(|| PhoneReputation::new(record.phone.as_str()));
        update(rep);
        let updated = rep.clone();

        deliveries.insert(record.order_id, record.clone());
        Ok(Some(updated))
    }
}
