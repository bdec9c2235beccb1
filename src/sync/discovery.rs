//! Deep scan: discover telemetry resources beyond the documented set
//!
//! Resources outside the core signal set are not pushed by default. A scan
//! registers candidate addresses with the gateway in small batches, then
//! reads the raw push bucket to see which ones the vehicle actually
//! delivered.
//!
//! ## Request list selection
//!
//! ```text
//! cached (catalog ∩ aliases) >= min items  -> cached
//! else keyword candidates non-empty        -> candidates
//! else                                     -> full alias list
//! ```
//!
//! When the cached list under-delivers, the full alias list is registered
//! as well.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::engine::{Activity, SyncEngine};
use super::indicator::ANY_VEHICLE;
use crate::telemetry::{normalize, request_list, RawSample, TelemetryAddress};
use crate::types::{AliasRecord, Result, SyncError};

/// Schema version every vehicle supports
const DEFAULT_ALIAS_VERSION: &str = "1.0";

const CANDIDATE_KEYWORDS: &[&str] = &[
    "SERVICE",
    "MAINTENANCE",
    "WARRANTY",
    "BOOKING",
    "APPOINTMENT",
    "NEXT",
    "SCHEDULE",
    "OTA",
    "UPDATE",
    "FIRMWARE",
    "VERSION",
    "ENERGY",
    "CONSUMPTION",
    "EFFICIENCY",
    "TRIP",
    "HISTORY",
    "NOTIFICATION",
    "ALERT",
    "ERROR",
    "FAULT",
    "DIAGNOSTIC",
    "RECALL",
    "CAMPAIGN",
];

const NAME_FIELDS: &[&str] = &["resourceName", "resource_name", "name", "deviceName"];
const ALIAS_FIELDS: &[&str] = &[
    "alias",
    "aliasName",
    "alias_name",
    "displayName",
    "resourceAlias",
];

/// Result of the last successful scan for a vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullTelemetry {
    pub samples: Vec<RawSample>,
    pub aliases: Vec<AliasRecord>,
    pub fetched_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A recent, large enough snapshot already exists
    Cached,
    Completed { samples: usize },
    /// Nothing delivered yet; the previous snapshot is kept
    NoSamples,
    Failed(SyncError),
}

/// Whether an alias record looks like a service/OTA/energy/diagnostic resource
pub fn is_scan_candidate(record: &AliasRecord) -> bool {
    let name = alias_field(record, NAME_FIELDS).to_uppercase();
    let alias = alias_field(record, ALIAS_FIELDS).to_uppercase();
    CANDIDATE_KEYWORDS
        .iter()
        .any(|keyword| name.contains(keyword) || alias.contains(keyword))
}

/// First present field as text: exact key, then any key differing only in case
fn alias_field(record: &AliasRecord, keys: &[&str]) -> String {
    let present = |value: &&serde_json::Value| match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    };
    for key in keys {
        let found = record.get(*key).filter(present).or_else(|| {
            record
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(key) && present(v))
                .map(|(_, v)| v)
        });
        if let Some(value) = found {
            return match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    String::new()
}

impl SyncEngine {
    /// Run a deep scan for `vin` unless a recent snapshot makes it unnecessary
    pub async fn fetch_full_telemetry(self: &Arc<Self>, vin: &str, force: bool) -> ScanOutcome {
        if vin.is_empty() {
            return ScanOutcome::Failed(SyncError::VehicleNotFound(String::new()));
        }

        let now = self.clock.now_ms();
        if !force && self.has_recent_snapshot(vin, now) {
            debug!(vin, "Using cached full telemetry");
            return ScanOutcome::Cached;
        }

        let _scanning = self.begin_activity(Activity::Scanning, ANY_VEHICLE);
        match self.deep_scan(vin, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(vin, error = %e, "Full telemetry scan failed");
                ScanOutcome::Failed(e)
            }
        }
    }

    fn has_recent_snapshot(&self, vin: &str, now: i64) -> bool {
        self.full_telemetry.get(vin).is_some_and(|snapshot| {
            now - snapshot.fetched_at < self.config.full_telemetry_ttl_ms
                && snapshot.samples.len() >= self.config.deep_scan_min_items
        })
    }

    async fn deep_scan(self: &Arc<Self>, vin: &str, started_at: i64) -> Result<ScanOutcome> {
        let version = self
            .vehicle(vin)
            .await
            .map(|info| info.alias_version().to_string())
            .unwrap_or_else(|| DEFAULT_ALIAS_VERSION.to_string());
        info!(vin, version = %version, "Starting deep scan");

        let mut aliases = self.api.get_aliases(vin, &version).await?;
        if aliases.is_empty() && version != DEFAULT_ALIAS_VERSION {
            info!(vin, version = %version, "No aliases for schema version, falling back to 1.0");
            aliases = self.api.get_aliases(vin, DEFAULT_ALIAS_VERSION).await?;
        }
        if aliases.is_empty() {
            return Err(SyncError::EmptyAliasCatalog(vin.to_string()));
        }

        let candidates: Vec<AliasRecord> = aliases
            .iter()
            .filter(|record| is_scan_candidate(record))
            .cloned()
            .collect();
        info!(vin, aliases = aliases.len(), candidates = candidates.len(), "Deep scan candidates selected");
        self.cache.entry(vin.to_string()).or_default().candidates = Some(candidates.clone());

        let candidate_list = request_list(&candidates);
        let fallback_list = request_list(&aliases);
        let known = self.catalog.keys_for(vin);
        let cached_list = request_list(
            aliases
                .iter()
                .filter(|record| normalize(record).is_some_and(|a| known.contains(&a))),
        );

        let min_items = self.config.deep_scan_min_items;
        let use_cached = cached_list.len() >= min_items;
        let requested = if use_cached {
            info!(vin, requested = cached_list.len(), "Using cached request list");
            cached_list
        } else if !candidate_list.is_empty() {
            candidate_list
        } else {
            fallback_list.clone()
        };

        self.register_in_batches(vin, &requested).await?;

        let mut delivered = self.bucket.len(vin);
        if delivered == 0 && !requested.is_empty() {
            delivered = self.await_delivery(vin).await;
        }

        let threshold = min_items
            .max((requested.len() as f64 * self.config.deep_scan_escalation_ratio).floor() as usize);
        if use_cached && !fallback_list.is_empty() && delivered < threshold {
            info!(
                vin,
                delivered,
                requested = requested.len(),
                fallback = fallback_list.len(),
                "Cached request list under-delivered, registering full alias list"
            );
            self.register_in_batches(vin, &fallback_list).await?;
            self.await_delivery(vin).await;
        }

        let samples = self.bucket.samples(vin);
        if samples.is_empty() {
            warn!(
                vin,
                kept_previous = self.full_telemetry.contains_key(vin),
                "No push samples delivered yet, keeping previous snapshot"
            );
            return Ok(ScanOutcome::NoSamples);
        }

        let count = samples.len();
        self.full_telemetry.insert(
            vin.to_string(),
            FullTelemetry {
                samples,
                aliases,
                fetched_at: started_at,
            },
        );
        info!(vin, samples = count, requested = requested.len(), "Deep scan complete");
        Ok(ScanOutcome::Completed { samples: count })
    }

    /// Register `addresses` for push delivery, pausing between batches
    async fn register_in_batches(&self, vin: &str, addresses: &[TelemetryAddress]) -> Result<()> {
        let batch_size = self.config.deep_scan_batch_size.max(1);
        let batches = addresses.len().div_ceil(batch_size);
        for (index, batch) in addresses.chunks(batch_size).enumerate() {
            debug!(vin, batch = index + 1, batches, size = batch.len(), "Registering resources");
            self.api.register_resources(vin, batch).await?;
            if index + 1 < batches {
                tokio::time::sleep(self.config.deep_scan_delay).await;
            }
        }
        Ok(())
    }

    /// Poll the bucket until something has arrived or the rounds run out
    async fn await_delivery(&self, vin: &str) -> usize {
        for round in 1..=self.config.deep_scan_retry_rounds {
            tokio::time::sleep(self.config.deep_scan_delay).await;
            let delivered = self.bucket.len(vin);
            if delivered > 0 {
                debug!(vin, round, delivered, "Push samples arrived");
                return delivered;
            }
        }
        self.bucket.len(vin)
    }

    /// Forget discovered addresses and raw samples for one vehicle, or all
    pub fn clear_catalog(&self, vin: Option<&str>) {
        self.catalog.clear(vin);
        self.bucket.clear(vin);
        info!(vin = vin.unwrap_or("*"), "Telemetry catalog cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::test_support::{alias, harness_with, raw_sample, Harness, MockApi};
    use crate::types::VehicleInfo;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn plain_aliases(count: i64) -> Vec<AliasRecord> {
        (1..=count).map(|i| alias(40_000 + i, 1, "Door sensor")).collect()
    }

    fn deliver(engine: &Arc<SyncEngine>, vin: &str, objects: impl Iterator<Item = i64>) {
        let raw: Vec<_> = objects.map(|o| raw_sample(o, 1, json!(1))).collect();
        engine.ingest_push(vin, Default::default(), &raw);
    }

    #[test]
    fn test_candidate_keyword_matching() {
        assert!(is_scan_candidate(&alias(1, 1, "Next service date")));
        assert!(is_scan_candidate(
            &json!({"DisplayName": "ota_progress"}).as_object().cloned().unwrap()
        ));
        assert!(!is_scan_candidate(&alias(1, 1, "Door front left")));
        assert!(!is_scan_candidate(&json!({"name": null}).as_object().cloned().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_candidates_in_batches() {
        let mut aliases = plain_aliases(10);
        aliases.extend((1..=30).map(|i| alias(50_000 + i, 2, "Firmware version")));
        let api = MockApi::default().with_aliases("1.0", aliases);
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());
        engine.bucket.ingest("VIN1", &[raw_sample(50_001, 2, json!("1.2.3"))], 0);

        let outcome = engine.fetch_full_telemetry("VIN1", false).await;

        assert_eq!(outcome, ScanOutcome::Completed { samples: 1 });
        let batches = api.registered_batches();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![24, 6]);
        assert!(batches.concat().iter().all(|a| a.object_id > 50_000));
        assert_eq!(engine.cache_entry("VIN1").unwrap().candidates.unwrap().len(), 30);
        assert!(!engine.state().is_scanning);
        assert_eq!(engine.full_telemetry("VIN1").unwrap().aliases.len(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_full_list_without_candidates() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(5));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        let outcome = engine.fetch_full_telemetry("VIN1", false).await;

        assert_eq!(outcome, ScanOutcome::NoSamples);
        assert_eq!(api.registered_total(), 5);
        assert!(engine.full_telemetry("VIN1").is_none());
        assert_eq!(engine.cache_entry("VIN1").unwrap().candidates, Some(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_and_delivery_rounds_are_paced() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(30));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        let started = Instant::now();
        let outcome = engine.fetch_full_telemetry("VIN1", false).await;
        let elapsed = started.elapsed();

        // One pause between the two batches, then three empty delivery rounds
        assert_eq!(outcome, ScanOutcome::NoSamples);
        assert_eq!(api.registered_batches().len(), 2);
        assert!(elapsed >= Duration::from_millis(2_800), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2_900), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_wait_stops_at_first_sample() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(5));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        let late = Arc::clone(&engine);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            late.bucket.ingest("VIN1", &[raw_sample(40_001, 1, json!(1))], 0);
        });

        let started = Instant::now();
        let outcome = engine.fetch_full_telemetry("VIN1", false).await;
        let elapsed = started.elapsed();

        // Nothing after round one, the sample is seen in round two
        assert_eq!(outcome, ScanOutcome::Completed { samples: 1 });
        assert_eq!(api.registered_batches().len(), 1);
        assert!(elapsed >= Duration::from_millis(1_400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2_100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_fallback_and_empty_catalog() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(3));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());
        *engine.vehicles.write().await = vec![VehicleInfo {
            vehicle_alias_version: Some("2.1".into()),
            ..VehicleInfo::new("VIN1")
        }];

        engine.fetch_full_telemetry("VIN1", false).await;
        assert_eq!(*api.alias_versions.lock().unwrap(), vec!["2.1", "1.0"]);

        let Harness { engine, .. } = harness_with(MockApi::default(), SyncConfig::default());
        let outcome = engine.fetch_full_telemetry("VIN1", false).await;
        assert_eq!(
            outcome,
            ScanOutcome::Failed(SyncError::EmptyAliasCatalog("VIN1".into()))
        );
        assert!(!engine.state().is_scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_under_delivering_cached_list_escalates_to_full_list() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(300));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        // 250 addresses known from earlier sessions, 50 of them delivering now
        engine
            .catalog
            .add_keys("VIN1", (1..=250).map(|i| TelemetryAddress::new(40_000 + i, 0, 1)));
        deliver(&engine, "VIN1", (1..=50).map(|i| 40_000 + i));

        let outcome = engine.fetch_full_telemetry("VIN1", false).await;

        let batches = api.registered_batches();
        let first_pass: usize = batches.iter().take(11).map(Vec::len).sum();
        assert_eq!(first_pass, 250);
        assert_eq!(api.registered_total(), 250 + 300);
        assert_eq!(outcome, ScanOutcome::Completed { samples: 50 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_well_delivering_cached_list_does_not_escalate() {
        let api = MockApi::default().with_aliases("1.0", plain_aliases(300));
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        engine
            .catalog
            .add_keys("VIN1", (1..=250).map(|i| TelemetryAddress::new(40_000 + i, 0, 1)));
        deliver(&engine, "VIN1", (1..=220).map(|i| 40_000 + i));

        let outcome = engine.fetch_full_telemetry("VIN1", false).await;
        assert_eq!(api.registered_total(), 250);
        assert_eq!(outcome, ScanOutcome::Completed { samples: 220 });

        // Fresh and large: the next scan is served from cache unless forced
        assert_eq!(engine.fetch_full_telemetry("VIN1", false).await, ScanOutcome::Cached);
        assert_eq!(api.registered_total(), 250);
        engine.fetch_full_telemetry("VIN1", true).await;
        assert_eq!(api.registered_total(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_samples_keeps_previous_snapshot() {
        let mut aliases = plain_aliases(2);
        aliases.push(alias(60_000, 1, "Trip history"));
        let api = MockApi::default().with_aliases("1.0", aliases);
        let Harness { engine, .. } = harness_with(api, SyncConfig::default());

        deliver(&engine, "VIN1", std::iter::once(60_000));
        engine.fetch_full_telemetry("VIN1", false).await;
        let before = engine.full_telemetry("VIN1").unwrap();

        engine.clear_catalog(Some("VIN1"));
        let outcome = engine.fetch_full_telemetry("VIN1", true).await;

        assert_eq!(outcome, ScanOutcome::NoSamples);
        assert_eq!(engine.full_telemetry("VIN1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_clear_catalog_drops_keys_and_samples() {
        let Harness { engine, .. } = harness_with(MockApi::default(), SyncConfig::default());
        deliver(&engine, "VIN1", 1..=3);
        deliver(&engine, "VIN2", 1..=2);

        engine.clear_catalog(Some("VIN1"));
        assert!(engine.catalog.keys_for("VIN1").is_empty());
        assert!(engine.bucket.is_empty("VIN1"));
        assert_eq!(engine.catalog.keys_for("VIN2").len(), 2);

        engine.clear_catalog(None);
        assert!(engine.catalog.snapshot().is_empty());
        assert!(engine.bucket.is_empty("VIN2"));
    }
}
