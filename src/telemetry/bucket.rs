//! Most recent raw push sample per (VIN, address)
//!
//! Written only by push ingestion. The deep scan reads it to confirm which
//! registered resources the vehicle actually delivered.

use std::collections::{BTreeSet, HashMap};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

use super::address::{normalize, TelemetryAddress};
use crate::types::vehicle::value_as_f64;

/// One raw sample as delivered by the push stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub address: TelemetryAddress,
    pub device_key: String,
    /// `value` (or `Value`) field of the delivery, if any
    pub value: Option<Value>,
    /// Sample timestamp, or receive time when the delivery carried none
    pub last_updated: i64,
    /// Original record with normalized id fields overlaid
    pub raw: Map<String, Value>,
}

impl RawSample {
    fn from_record(address: TelemetryAddress, record: &Map<String, Value>, now: i64) -> Self {
        let mut raw = record.clone();
        raw.insert("objectId".into(), Value::from(address.object_id.to_string()));
        raw.insert("instanceId".into(), Value::from(address.instance_id.to_string()));
        raw.insert("resourceId".into(), Value::from(address.resource_id.to_string()));
        raw.insert("deviceKey".into(), Value::from(address.device_key()));

        let last_updated = record
            .get("timestamp")
            .and_then(value_as_f64)
            .filter(|ts| *ts != 0.0)
            .map(|ts| ts as i64)
            .unwrap_or(now);

        Self {
            address,
            device_key: address.device_key(),
            value: record.get("value").or_else(|| record.get("Value")).cloned(),
            last_updated,
            raw,
        }
    }
}

/// VIN -> (address -> latest raw sample)
#[derive(Debug, Default)]
pub struct RawSampleBucket {
    by_vin: DashMap<String, HashMap<TelemetryAddress, RawSample>>,
}

impl RawSampleBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store valid records for `vin`, returning the addresses they carried.
    /// Records without a resolvable address are dropped.
    pub fn ingest(&self, vin: &str, records: &[Value], now: i64) -> Vec<TelemetryAddress> {
        if vin.is_empty() || records.is_empty() {
            return Vec::new();
        }

        let mut bucket = self.by_vin.entry(vin.to_string()).or_default();
        let mut discovered = Vec::new();
        for record in records.iter().filter_map(Value::as_object) {
            let Some(address) = normalize(record) else {
                continue;
            };
            bucket.insert(address, RawSample::from_record(address, record, now));
            discovered.push(address);
        }
        discovered
    }

    /// All samples for `vin`, ordered by address
    pub fn samples(&self, vin: &str) -> Vec<RawSample> {
        let mut out: Vec<RawSample> = self
            .by_vin
            .get(vin)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|s| s.address);
        out
    }

    pub fn len(&self, vin: &str) -> usize {
        self.by_vin.get(vin).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, vin: &str) -> bool {
        self.len(vin) == 0
    }

    pub fn addresses(&self, vin: &str) -> BTreeSet<TelemetryAddress> {
        self.by_vin
            .get(vin)
            .map(|bucket| bucket.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drop one VIN's samples, or everything
    pub fn clear(&self, vin: Option<&str>) {
        match vin {
            Some(vin) => {
                self.by_vin.remove(vin);
            }
            None => self.by_vin.clear(),
        }
    }
}
