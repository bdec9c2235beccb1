//! Fetch deduplication and refresh scheduling
//!
//! Snapshot fetches are coalesced per VIN: however many callers ask for the
//! same vehicle at once, one request goes out and every caller receives its
//! outcome. Foreground fetches drive the shared "refreshing" flag.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::engine::{Activity, SyncEngine};
use super::indicator::ANY_VEHICLE;
use crate::cache::{is_meaningful, telemetry_baseline, CacheEntry, SESSION_SIGNALS};
use crate::types::{
    coordinates_of, MergeOptions, Result, Signals, SyncError, VehicleInfo, VehicleUpdate,
};

/// Signals that mean the backend already enriched the snapshot
const EXTERNAL_TEXT_SIGNALS: &[&str] = &["location_address", "weather_address"];
const EXTERNAL_VALUE_SIGNALS: &[&str] = &["weather_outside_temp", "weather_code"];

/// Result of one snapshot fetch, shared by every coalesced caller
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Payload merged into the cache (and the live view if active)
    Updated,
    /// No vehicle to fetch for
    Empty,
    Failed(SyncError),
}

impl FetchOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, FetchOutcome::Updated)
    }
}

impl SyncEngine {
    /// Fetch a telemetry snapshot for `vin`, joining a pending fetch if one
    /// exists.
    ///
    /// The request itself runs on its own task and always completes, even if
    /// this caller stops waiting.
    pub async fn fetch_snapshot(self: &Arc<Self>, vin: &str, background: bool) -> FetchOutcome {
        if vin.is_empty() {
            return FetchOutcome::Empty;
        }

        let _refreshing =
            (!background).then(|| self.begin_activity(Activity::Refreshing, ANY_VEHICLE));

        let engine = Arc::clone(self);
        let target = vin.to_string();
        let outcome = self
            .fetches
            .run(vin, move || async move { engine.run_fetch(&target).await })
            .await
            .unwrap_or_else(FetchOutcome::Failed);

        if outcome.is_updated() && !background {
            self.refresh_timer.reset();
        }
        outcome
    }

    async fn run_fetch(self: &Arc<Self>, vin: &str) -> FetchOutcome {
        let payload = match self.api.get_telemetry(vin).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(vin, error = %e, "Telemetry refresh failed");
                return FetchOutcome::Failed(e);
            }
        };
        if payload.is_empty() {
            // Counts as a refresh; the entry is still stamped
            debug!(vin, "Telemetry snapshot was empty");
        }

        let coordinates = coordinates_of(&payload);
        let enriched = has_external_enrichment(&payload);
        let signals = payload.len();

        self.merge(
            VehicleUpdate::from_payload(Some(vin), payload),
            MergeOptions::POLL,
        );
        self.live.send_if_modified(|state| {
            let first = !state.is_initialized;
            state.is_initialized = true;
            first
        });

        if let (Some((lat, lon)), false) = (coordinates, enriched) {
            self.spawn_enrichment(vin, lat, lon, false);
        }

        info!(vin, signals, "Telemetry snapshot merged");
        FetchOutcome::Updated
    }

    /// Make `vin` the active vehicle.
    ///
    /// Cached data is shown immediately. A fetch is started in the background
    /// unless the cache holds fresh telemetry.
    pub async fn switch_vehicle(self: &Arc<Self>, vin: &str) -> Result<()> {
        let Some(info) = self.vehicle(vin).await else {
            warn!(vin, "Vehicle not found during switch");
            return Err(SyncError::VehicleNotFound(vin.to_string()));
        };

        let now = self.clock.now_ms();
        let baseline = telemetry_baseline(self.config.default_location);

        let (fresh, cached_coordinates) = {
            // Held through the swap so no merge for `vin` lands in between
            let cached = self.cache.get(vin);
            let fresh = cached.as_ref().is_some_and(|entry| {
                entry.is_fresh(now, self.config.cache_ttl_ms, self.config.cache_future_skew_ms)
            });

            self.live.send_modify(|state| {
                let mut signals: Signals = SESSION_SIGNALS
                    .iter()
                    .filter_map(|key| state.signals.get(*key).map(|v| (key.to_string(), v.clone())))
                    .collect();
                let avatar = signals.get("user_avatar").cloned();
                signals.extend(baseline);
                signals.extend(info.base_signals(avatar.as_ref()));
                if let Some(entry) = cached.as_deref() {
                    signals.extend(entry.signals.iter().map(|(k, v)| (k.clone(), v.clone())));
                }

                state.vin = Some(vin.to_string());
                state.signals = signals;
                state.last_updated = cached
                    .as_deref()
                    .and_then(|entry| entry.last_updated)
                    .unwrap_or(0);
                state.is_refreshing = !fresh;
                state.is_enriching = self.enriching.is_active(vin);
            });

            let coordinates = cached.as_deref().and_then(|entry| coordinates_of(&entry.signals));
            (fresh, coordinates)
        };

        info!(vin, fresh, "Switched active vehicle");

        if let Some((lat, lon)) = cached_coordinates {
            self.spawn_enrichment(vin, lat, lon, false);
        }

        let push = Arc::clone(&self.push);
        let target = vin.to_string();
        tokio::spawn(async move {
            if let Err(e) = push.switch_subscription(&target).await {
                warn!(vin = %target, error = %e, "Push subscription switch failed");
            }
        });

        if !fresh {
            let engine = Arc::clone(self);
            let target = vin.to_string();
            tokio::spawn(async move {
                engine.fetch_snapshot(&target, false).await;
            });
        }

        Ok(())
    }

    /// Force a foreground fetch for `vin` while keeping displayed data.
    ///
    /// The cache entry loses its freshness stamp; a vehicle with no entry
    /// gets a placeholder built from its metadata.
    pub async fn refresh_vehicle(self: &Arc<Self>, vin: &str) -> FetchOutcome {
        if vin.is_empty() {
            return FetchOutcome::Empty;
        }

        let info = self.vehicle(vin).await;
        let avatar = self.live.borrow().signals.get("user_avatar").cloned();
        match self.cache.entry(vin.to_string()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().last_updated = None;
            }
            Entry::Vacant(slot) => {
                let signals = match info {
                    Some(info) => info.base_signals(avatar.as_ref()),
                    None => {
                        let mut signals = Signals::new();
                        signals.insert("vin".to_string(), Value::from(vin));
                        signals
                    }
                };
                slot.insert(CacheEntry::from_signals(signals));
            }
        }

        self.live.send_modify(|state| state.is_refreshing = true);
        self.fetch_snapshot(vin, false).await
    }

    /// Fetch every inactive vehicle whose cache was never stamped, one at a
    /// time. Returns how many fetches were made.
    pub async fn prefetch_other_vehicles(self: &Arc<Self>) -> usize {
        let active = self.active_vin();
        let vehicles = self.vehicles().await;

        let mut fetched = 0;
        for info in vehicles
            .iter()
            .filter(|v| active.as_deref() != Some(v.vin_code.as_str()))
        {
            let stamped = self
                .cache
                .get(&info.vin_code)
                .is_some_and(|entry| entry.last_updated.is_some());
            if stamped {
                continue;
            }
            info!(vin = %info.vin_code, "Prefetching telemetry for background vehicle");
            self.fetch_snapshot(&info.vin_code, true).await;
            fetched += 1;
        }
        fetched
    }

    /// Load the vehicle list, seed the cache with static metadata, select
    /// the first vehicle and prefetch the rest in the background.
    ///
    /// Returns the selected VIN, or `None` when the account has no vehicles.
    pub async fn fetch_vehicles(self: &Arc<Self>) -> Result<Option<String>> {
        let listed = self.api.get_vehicles().await.map_err(|e| {
            warn!(error = %e, "Vehicle list fetch failed");
            e
        })?;
        let vehicles = dedupe_by_vin(listed);
        let Some(first) = vehicles.first().map(|v| v.vin_code.clone()) else {
            info!("Account has no vehicles");
            return Ok(None);
        };

        self.cache.clear();
        for info in &vehicles {
            self.cache.insert(
                info.vin_code.clone(),
                CacheEntry::from_signals(info.metadata_signals()),
            );
        }
        info!(vehicles = vehicles.len(), selected = %first, "Vehicle list loaded");
        *self.vehicles.write().await = vehicles;

        self.switch_vehicle(&first).await?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.prefetch_other_vehicles().await;
        });

        Ok(Some(first))
    }

    /// Load the signed-in user's name and avatar into the live view
    pub async fn fetch_user(&self) -> Result<()> {
        let profile = self.api.get_user_profile().await.map_err(|e| {
            warn!(error = %e, "User profile fetch failed");
            e
        })?;

        let name = profile
            .name
            .filter(|n| !n.is_empty())
            .or(profile.sub.filter(|s| !s.is_empty()));
        self.live.send_modify(|state| {
            if let Some(name) = name {
                state.signals.insert("user_name".to_string(), Value::from(name));
            }
            let has_vehicle_image = state
                .signals
                .get("profile_image")
                .is_some_and(is_meaningful);
            if !has_vehicle_image {
                if let Some(picture) = profile.picture {
                    state
                        .signals
                        .insert("user_avatar".to_string(), Value::from(picture));
                }
            }
        });
        Ok(())
    }
}

/// First-seen order, last occurrence wins; entries without a VIN are dropped
fn dedupe_by_vin(listed: Vec<VehicleInfo>) -> Vec<VehicleInfo> {
    let mut order: Vec<String> = Vec::new();
    let mut by_vin: HashMap<String, VehicleInfo> = HashMap::new();
    for info in listed.into_iter().filter(|v| !v.vin_code.is_empty()) {
        if !by_vin.contains_key(&info.vin_code) {
            order.push(info.vin_code.clone());
        }
        by_vin.insert(info.vin_code.clone(), info);
    }
    order
        .into_iter()
        .filter_map(|vin| by_vin.remove(&vin))
        .collect()
}

fn has_external_enrichment(payload: &Signals) -> bool {
    let has_text = EXTERNAL_TEXT_SIGNALS
        .iter()
        .filter_map(|key| payload.get(*key))
        .any(|value| match value {
            Value::String(s) => !s.is_empty(),
            Value::Null | Value::Bool(false) => false,
            _ => true,
        });
    let has_value = EXTERNAL_VALUE_SIGNALS
        .iter()
        .filter_map(|key| payload.get(*key))
        .any(|value| !value.is_null());
    has_text || has_value
}
