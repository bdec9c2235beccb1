//! Location and weather enrichment, throttled by time and distance
//!
//! A lookup for a vehicle runs when forced, when none was attempted yet,
//! when the last attempt is older than the enrichment TTL, or when the
//! vehicle moved at least the configured distance since then. At most one
//! lookup per vehicle is in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::engine::{Activity, SyncEngine};
use crate::types::{is_valid_coord_pair, MergeOptions, Result, SyncError, VehicleUpdate};

/// Mean Earth radius used for haversine distances
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichDecision {
    /// Throttled, invalid coordinates, or the lookup task was lost
    Skipped,
    /// Lookups ran; individual lookups may still have failed
    Completed,
}

/// Last enrichment attempt for a vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichAttempt {
    pub latitude: f64,
    pub longitude: f64,
    pub attempted_at: i64,
}

/// Great-circle distance in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

impl SyncEngine {
    /// Enrich `vin` with a place name and current weather for the given
    /// coordinates, subject to throttling.
    pub async fn maybe_enrich(
        self: &Arc<Self>,
        vin: &str,
        latitude: f64,
        longitude: f64,
        force: bool,
    ) -> EnrichDecision {
        if vin.is_empty() || !is_valid_coord_pair(latitude, longitude) {
            return EnrichDecision::Skipped;
        }
        if !self.should_enrich(vin, latitude, longitude, force) {
            debug!(vin, "Enrichment throttled");
            return EnrichDecision::Skipped;
        }

        let engine = Arc::clone(self);
        let target = vin.to_string();
        match self
            .enrichments
            .run(vin, move || async move {
                engine.run_enrichment(&target, latitude, longitude).await
            })
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(vin, error = %e, "Enrichment task lost");
                EnrichDecision::Skipped
            }
        }
    }

    /// Fire-and-forget [`Self::maybe_enrich`]
    pub(crate) fn spawn_enrichment(
        self: &Arc<Self>,
        vin: &str,
        latitude: f64,
        longitude: f64,
        force: bool,
    ) {
        let engine = Arc::clone(self);
        let vin = vin.to_string();
        tokio::spawn(async move {
            engine.maybe_enrich(&vin, latitude, longitude, force).await;
        });
    }

    fn should_enrich(&self, vin: &str, latitude: f64, longitude: f64, force: bool) -> bool {
        if force {
            return true;
        }
        let Some(last) = self.enrich_attempts.get(vin).map(|attempt| *attempt) else {
            return true;
        };
        if self.clock.now_ms() - last.attempted_at > self.config.enrich_ttl_ms {
            return true;
        }
        haversine_m(last.latitude, last.longitude, latitude, longitude)
            >= self.config.enrich_distance_m
    }

    async fn run_enrichment(
        self: &Arc<Self>,
        vin: &str,
        latitude: f64,
        longitude: f64,
    ) -> EnrichDecision {
        let attempted_at = self.clock.now_ms();
        let _enriching = self.begin_activity(Activity::Enriching, vin);
        let limit = self.config.enrich_timeout;

        let (place, weather) = tokio::join!(
            within(limit, self.api.fetch_location_name(latitude, longitude)),
            within(limit, self.api.fetch_weather(latitude, longitude)),
        );

        let mut update = VehicleUpdate::new(vin);
        match place {
            Ok(place) => {
                if let Some(address) = place.location_address.filter(|s| !s.is_empty()) {
                    update = update.with("location_address", address);
                }
                if let Some(address) = place.weather_address.filter(|s| !s.is_empty()) {
                    update = update.with("weather_address", address);
                }
            }
            Err(e) => warn!(vin, error = %e, "Reverse geocode failed"),
        }
        match weather {
            Ok(report) => {
                if let Some(temperature) = report.temperature {
                    update = update.with("weather_outside_temp", temperature);
                }
                if let Some(code) = report.weathercode {
                    update = update.with("weather_code", Value::from(code));
                }
            }
            Err(e) => warn!(vin, error = %e, "Weather lookup failed"),
        }

        let resolved = update.signals.len();
        if resolved > 0 {
            self.merge(update, MergeOptions::PUSH);
        }
        self.enrich_attempts.insert(
            vin.to_string(),
            EnrichAttempt {
                latitude,
                longitude,
                attempted_at,
            },
        );

        info!(vin, latitude, longitude, resolved, "Location enrichment finished");
        EnrichDecision::Completed
    }
}

/// Run `lookup` under `limit`, folding a timeout into the lookup's error
async fn within<T, F>(limit: Duration, lookup: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, lookup)
        .await
        .map_err(SyncError::from)
        .and_then(|result| result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::test_support::{harness, harness_with, Harness, MockApi};
    use crate::types::{LocationName, WeatherReport};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const LAT: f64 = 21.0285;
    const LON: f64 = 105.8542;

    fn api_with_lookups() -> MockApi {
        let api = MockApi::default();
        *api.location.lock().unwrap() = Some(LocationName {
            location_address: Some("Hoan Kiem, Ha Noi".into()),
            weather_address: Some("Ha Noi".into()),
        });
        *api.weather.lock().unwrap() = Some(WeatherReport {
            temperature: Some(31.5),
            weathercode: Some(3),
        });
        api
    }

    #[test]
    fn test_haversine_distances() {
        assert!(haversine_m(LAT, LON, LAT, LON).abs() < 1e-6);
        // One degree of latitude is ~111.2 km
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 50.0, "got {}", d);
    }

    #[tokio::test]
    async fn test_nearby_position_within_ttl_is_throttled() {
        let Harness {
            engine, api, clock, ..
        } = harness_with(api_with_lookups(), SyncConfig::default());

        assert_eq!(
            engine.maybe_enrich("VIN1", LAT, LON, false).await,
            EnrichDecision::Completed
        );

        // ~10 m north, 30 s later
        clock.advance_ms(30_000);
        assert_eq!(
            engine.maybe_enrich("VIN1", LAT + 0.00009, LON, false).await,
            EnrichDecision::Skipped
        );
        assert_eq!(api.geocode_calls(), 1);

        // ~600 m north
        clock.advance_ms(10_000);
        assert_eq!(
            engine.maybe_enrich("VIN1", LAT + 0.0054, LON, false).await,
            EnrichDecision::Completed
        );
        assert_eq!(api.geocode_calls(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_and_force_bypass_throttle() {
        let Harness {
            engine, api, clock, ..
        } = harness_with(api_with_lookups(), SyncConfig::default());

        engine.maybe_enrich("VIN1", LAT, LON, false).await;
        engine.maybe_enrich("VIN1", LAT, LON, true).await;
        assert_eq!(api.geocode_calls(), 2);

        clock.advance_ms(3 * 60_000 + 1);
        engine.maybe_enrich("VIN1", LAT, LON, false).await;
        assert_eq!(api.geocode_calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_are_ignored() {
        let Harness { engine, api, .. } = harness();
        assert_eq!(
            engine.maybe_enrich("VIN1", 95.0, LON, true).await,
            EnrichDecision::Skipped
        );
        assert_eq!(
            engine.maybe_enrich("VIN1", f64::NAN, LON, true).await,
            EnrichDecision::Skipped
        );
        assert_eq!(api.geocode_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolved_fields_merge_into_active_vehicle() {
        let Harness { engine, .. } = harness_with(api_with_lookups(), SyncConfig::default());
        engine.live.send_modify(|s| s.vin = Some("VIN1".into()));

        engine.maybe_enrich("VIN1", LAT, LON, false).await;

        let state = engine.state();
        assert_eq!(state.signal("location_address"), Some(&json!("Hoan Kiem, Ha Noi")));
        assert_eq!(state.signal("weather_address"), Some(&json!("Ha Noi")));
        assert_eq!(state.signal("weather_outside_temp"), Some(&json!(31.5)));
        assert_eq!(state.signal("weather_code"), Some(&json!(3)));
        assert!(!state.is_enriching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_geocoder_times_out_independently() {
        let api = api_with_lookups();
        *api.geocode_delay.lock().unwrap() = std::time::Duration::from_secs(30);
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        assert_eq!(
            engine.maybe_enrich("VIN1", LAT, LON, false).await,
            EnrichDecision::Completed
        );

        let entry = engine.cache_entry("VIN1").unwrap();
        assert!(!entry.signals.contains_key("location_address"));
        assert_eq!(entry.signals["weather_code"], json!(3));
        assert!(engine.enrich_attempts.contains_key("VIN1"));
        assert_eq!(api.weather_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookups_still_record_attempt() {
        let Harness { engine, api, .. } = harness();

        assert_eq!(
            engine.maybe_enrich("VIN1", LAT, LON, false).await,
            EnrichDecision::Completed
        );
        assert!(engine.cache_entry("VIN1").is_none());
        assert_eq!(
            engine.maybe_enrich("VIN1", LAT, LON, false).await,
            EnrichDecision::Skipped
        );
        assert_eq!(api.geocode_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_enrichment_runs_once() {
        let api = api_with_lookups();
        *api.geocode_delay.lock().unwrap() = std::time::Duration::from_millis(200);
        let Harness { engine, api, .. } = harness_with(api, SyncConfig::default());

        let (a, b) = tokio::join!(
            engine.maybe_enrich("VIN1", LAT, LON, false),
            engine.maybe_enrich("VIN1", LAT, LON, false)
        );
        assert_eq!(a, EnrichDecision::Completed);
        assert_eq!(b, EnrichDecision::Completed);
        assert_eq!(api.geocode_calls(), 1);
    }
}
