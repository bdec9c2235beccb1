//! Inspection accessors for the discovery catalog
//!
//! Compiled into debug builds, and into release builds with the
//! `diagnostics` feature.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::sync::SyncEngine;
use crate::telemetry::CatalogEntry;
use crate::types::AliasRecord;

/// One raw sample from the latest deep scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSample {
    pub key: String,
    pub device_key: String,
    pub value: Option<Value>,
    pub raw: Map<String, Value>,
}

/// Catalog and scan totals for one vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorEntry {
    pub catalog_keys: usize,
    pub snapshot_keys: usize,
    pub snapshot_count: usize,
}

impl SyncEngine {
    /// Every unexpired catalog entry
    pub fn catalog_snapshot(&self) -> BTreeMap<String, CatalogEntry> {
        self.catalog.snapshot()
    }

    /// Catalog addresses for `vin` as canonical keys
    pub fn catalog_keys_for(&self, vin: &str) -> Vec<String> {
        self.catalog
            .keys_for(vin)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Samples of the latest deep scan for `vin`
    pub fn live_snapshot_for(&self, vin: &str) -> Vec<LiveSample> {
        self.full_telemetry(vin)
            .map(|snapshot| {
                snapshot
                    .samples
                    .into_iter()
                    .map(|sample| LiveSample {
                        key: sample.address.to_string(),
                        device_key: sample.device_key,
                        value: sample.value,
                        raw: sample.raw,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Totals per vehicle, for one VIN or every VIN with a catalog entry or scan
    pub fn inspector_report(&self, vin: Option<&str>) -> BTreeMap<String, InspectorEntry> {
        let catalog = self.catalog.snapshot();
        let vins: Vec<String> = match vin {
            Some(vin) => vec![vin.to_string()],
            None => {
                let mut all: Vec<String> = catalog
                    .keys()
                    .cloned()
                    .chain(self.full_telemetry.iter().map(|e| e.key().clone()))
                    .collect();
                all.sort();
                all.dedup();
                all
            }
        };

        vins.into_iter()
            .map(|vin| {
                let samples = self.full_telemetry(&vin).map(|s| s.samples).unwrap_or_default();
                let snapshot_keys = samples
                    .iter()
                    .map(|s| s.address)
                    .collect::<std::collections::BTreeSet<_>>()
                    .len();
                let entry = InspectorEntry {
                    catalog_keys: catalog.get(&vin).map(|e| e.keys.len()).unwrap_or(0),
                    snapshot_keys,
                    snapshot_count: samples.len(),
                };
                (vin, entry)
            })
            .collect()
    }

    /// Keyword candidates from the latest scan of `vin`
    pub fn scan_candidates(&self, vin: &str) -> Vec<AliasRecord> {
        self.cache_entry(vin)
            .and_then(|entry| entry.candidates)
            .unwrap_or_default()
    }
}
