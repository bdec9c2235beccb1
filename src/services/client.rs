//! Collaborator interfaces consumed by the engine
//!
//! The engine never manages credentials, request signing or push
//! connections itself. Everything it needs from the outside world goes
//! through these two traits, and every call is fail-fast: the engine
//! performs no retry beyond what the deep-scan protocol prescribes.

use crate::telemetry::TelemetryAddress;
use crate::types::{AliasRecord, LocationName, Result, Signals, UserProfile, VehicleInfo, WeatherReport};

/// Dashboard backend and external lookup services
#[async_trait::async_trait]
pub trait ApiClient: Send + Sync {
    /// Vehicles owned by the signed-in user
    async fn get_vehicles(&self) -> Result<Vec<VehicleInfo>>;

    async fn get_user_profile(&self) -> Result<UserProfile>;

    /// Partial snapshot of the vehicle's current state
    async fn get_telemetry(&self, vin: &str) -> Result<Signals>;

    /// Resource-alias catalog for a vehicle schema version
    async fn get_aliases(&self, vin: &str, version: &str) -> Result<Vec<AliasRecord>>;

    /// Ask the gateway to start pushing these addresses for `vin`
    async fn register_resources(&self, vin: &str, addresses: &[TelemetryAddress]) -> Result<()>;

    /// Reverse geocode
    async fn fetch_location_name(&self, latitude: f64, longitude: f64) -> Result<LocationName>;

    async fn fetch_weather(&self, latitude: f64, longitude: f64) -> Result<WeatherReport>;
}

/// Push-stream client
#[async_trait::async_trait]
pub trait PushClient: Send + Sync {
    /// Follow `vin` on the live stream. Best effort.
    async fn switch_subscription(&self, vin: &str) -> Result<()>;
}

/// Push client for hosts without a live stream
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushClient;

#[async_trait::async_trait]
impl PushClient for NoopPushClient {
    async fn switch_subscription(&self, _vin: &str) -> Result<()> {
        Ok(())
    }
}
