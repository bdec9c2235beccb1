//! Mock collaborators for engine tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};

use super::SyncEngine;
use crate::clock::ManualClock;
use crate::config::SyncConfig;
use crate::services::{ApiClient, PushClient};
use crate::telemetry::{InMemoryCatalogStore, TelemetryAddress};
use crate::types::{
    AliasRecord, LocationName, Result, Signals, SyncError, UserProfile, VehicleInfo, WeatherReport,
};

/// Start of the manual clock in tests (2024-01-01T00:00:00Z)
pub const T0: i64 = 1_704_067_200_000;

#[derive(Default)]
pub struct MockApi {
    pub vehicles: Mutex<Vec<VehicleInfo>>,
    pub user: Mutex<UserProfile>,
    pub telemetry: DashMap<String, Signals>,
    pub telemetry_error: Mutex<Option<SyncError>>,
    pub telemetry_delay: Mutex<Duration>,
    /// Alias catalogs by schema version
    pub aliases: DashMap<String, Vec<AliasRecord>>,
    pub location: Mutex<Option<LocationName>>,
    pub weather: Mutex<Option<WeatherReport>>,
    pub geocode_delay: Mutex<Duration>,

    pub telemetry_calls: AtomicUsize,
    pub alias_versions: Mutex<Vec<String>>,
    pub registered: Mutex<Vec<Vec<TelemetryAddress>>>,
    pub geocode_calls: AtomicUsize,
    pub weather_calls: AtomicUsize,
}

impl MockApi {
    pub fn with_telemetry(self, vin: &str, payload: Value) -> Self {
        self.telemetry
            .insert(vin.to_string(), payload.as_object().cloned().unwrap_or_default());
        self
    }

    pub fn with_vehicles(self, vehicles: Vec<VehicleInfo>) -> Self {
        *self.vehicles.lock().unwrap() = vehicles;
        self
    }

    pub fn with_aliases(self, version: &str, aliases: Vec<AliasRecord>) -> Self {
        self.aliases.insert(version.to_string(), aliases);
        self
    }

    pub fn telemetry_calls(&self) -> usize {
        self.telemetry_calls.load(Ordering::SeqCst)
    }

    pub fn geocode_calls(&self) -> usize {
        self.geocode_calls.load(Ordering::SeqCst)
    }

    /// Addresses registered, one list per request
    pub fn registered_batches(&self) -> Vec<Vec<TelemetryAddress>> {
        self.registered.lock().unwrap().clone()
    }

    pub fn registered_total(&self) -> usize {
        self.registered_batches().iter().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl ApiClient for MockApi {
    async fn get_vehicles(&self) -> Result<Vec<VehicleInfo>> {
        Ok(self.vehicles.lock().unwrap().clone())
    }

    async fn get_user_profile(&self) -> Result<UserProfile> {
        Ok(self.user.lock().unwrap().clone())
    }

    async fn get_telemetry(&self, vin: &str) -> Result<Signals> {
        self.telemetry_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.telemetry_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.telemetry_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .telemetry
            .get(vin)
            .map(|payload| payload.clone())
            .unwrap_or_default())
    }

    async fn get_aliases(&self, _vin: &str, version: &str) -> Result<Vec<AliasRecord>> {
        self.alias_versions.lock().unwrap().push(version.to_string());
        Ok(self
            .aliases
            .get(version)
            .map(|aliases| aliases.clone())
            .unwrap_or_default())
    }

    async fn register_resources(&self, _vin: &str, addresses: &[TelemetryAddress]) -> Result<()> {
        self.registered.lock().unwrap().push(addresses.to_vec());
        Ok(())
    }

    async fn fetch_location_name(&self, _latitude: f64, _longitude: f64) -> Result<LocationName> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.geocode_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.location
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Http("geocoder unavailable".into()))
    }

    async fn fetch_weather(&self, _latitude: f64, _longitude: f64) -> Result<WeatherReport> {
        self.weather_calls.fetch_add(1, Ordering::SeqCst);
        self.weather
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Http("weather unavailable".into()))
    }
}

#[derive(Default)]
pub struct MockPush {
    pub switched: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait::async_trait]
impl PushClient for MockPush {
    async fn switch_subscription(&self, vin: &str) -> Result<()> {
        self.switched.lock().unwrap().push(vin.to_string());
        if self.fail {
            return Err(SyncError::Http("broker offline".into()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub api: Arc<MockApi>,
    pub push: Arc<MockPush>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(MockApi::default(), SyncConfig::default())
}

pub fn harness_with(api: MockApi, config: SyncConfig) -> Harness {
    harness_with_push(api, MockPush::default(), config)
}

pub fn harness_with_push(api: MockApi, push: MockPush, config: SyncConfig) -> Harness {
    let api = Arc::new(api);
    let push = Arc::new(push);
    let clock = Arc::new(ManualClock::new(T0));
    let engine = SyncEngine::with_clock(
        api.clone(),
        push.clone(),
        Arc::new(InMemoryCatalogStore::new()),
        clock.clone(),
        config,
    );
    // Vehicles listed by the mock are known to the engine from the start
    if let Ok(mut known) = engine.vehicles.try_write() {
        *known = api.vehicles.lock().unwrap().clone();
    }
    Harness {
        engine,
        api,
        push,
        clock,
    }
}

pub fn vehicle(vin: &str, name: &str) -> VehicleInfo {
    VehicleInfo {
        marketing_name: Some(name.to_string()),
        exterior_color: Some("Crimson Red".to_string()),
        year_of_product: Some(2023),
        battery_capacity: Some(87.7),
        ..VehicleInfo::new(vin)
    }
}

/// Alias record for `object/0/resource` with a display name
pub fn alias(object_id: i64, resource_id: i64, name: &str) -> AliasRecord {
    json!({
        "devObjID": object_id.to_string(),
        "devObjInstID": "0",
        "devRsrcID": resource_id.to_string(),
        "resourceName": name,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// Raw push record for `object/0/resource`
pub fn raw_sample(object_id: i64, resource_id: i64, value: Value) -> Value {
    json!({
        "deviceKey": format!("{}_0_{}", object_id, resource_id),
        "value": value,
    })
}
