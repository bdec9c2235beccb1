//! Live vehicle state and partial updates
//!
//! Signals are kept as a JSON object so that "absent" (key missing) and
//! "explicitly cleared" (`null`) stay distinguishable all the way from the
//! wire to the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::vehicle::value_as_f64;

/// Signal name -> value
pub type Signals = serde_json::Map<String, Value>;

/// The live view of the active vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Active vehicle, if any
    pub vin: Option<String>,
    /// Signal values currently displayed
    pub signals: Signals,
    /// Timestamp (ms since epoch) of the last merge into the live view
    pub last_updated: i64,
    pub is_refreshing: bool,
    pub is_scanning: bool,
    pub is_enriching: bool,
    /// Set after the first successful snapshot fetch
    pub is_initialized: bool,
}

impl VehicleState {
    pub fn signal(&self, key: &str) -> Option<&Value> {
        self.signals.get(key)
    }

    /// Valid latitude/longitude pair from the live signals
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        coordinates_of(&self.signals)
    }
}

/// Ingestion policy for a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Treat `null` as "no signal this cycle" instead of "cleared"
    pub skip_null_values: bool,
}

impl MergeOptions {
    /// Push samples: explicit nulls clear signals
    pub const PUSH: Self = Self {
        skip_null_values: false,
    };

    /// Snapshot polling: nulls never overwrite known values
    pub const POLL: Self = Self {
        skip_null_values: true,
    };
}

/// A partial update for one vehicle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleUpdate {
    /// Target vehicle; `None` targets the active vehicle
    pub vin: Option<String>,
    /// Caller-provided timestamp (ms since epoch)
    pub last_updated: Option<i64>,
    pub signals: Signals,
}

impl VehicleUpdate {
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: Some(vin.into()),
            ..Default::default()
        }
    }

    /// Update addressed to whichever vehicle is active at merge time
    pub fn for_active() -> Self {
        Self::default()
    }

    /// Build from a wire payload, lifting `vin` and `lastUpdated` out of the
    /// signal map when present.
    pub fn from_payload(vin: Option<&str>, mut payload: Signals) -> Self {
        let embedded_vin = payload
            .remove("vin")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|v| !v.is_empty());
        let last_updated = payload
            .remove("lastUpdated")
            .or_else(|| payload.remove("last_updated"))
            .as_ref()
            .and_then(value_as_f64)
            .map(|ts| ts as i64);

        Self {
            vin: vin.map(str::to_string).or(embedded_vin),
            last_updated,
            signals: payload,
        }
    }

    /// Builder-style signal setter
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.signals.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timestamp(mut self, last_updated: i64) -> Self {
        self.last_updated = Some(last_updated);
        self
    }

    /// Signals that take effect under `options`.
    ///
    /// Absent keys never reach here; with `skip_null_values` explicit nulls
    /// are dropped as well.
    pub fn sanitized(&self, options: MergeOptions) -> Signals {
        self.signals
            .iter()
            .filter(|(_, value)| !(options.skip_null_values && value.is_null()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Numeric coordinate from a signal value
pub fn coord_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(value_as_f64)
}

/// Both coordinates present and in range
pub fn is_valid_coord_pair(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Valid `(latitude, longitude)` from a signal map
pub fn coordinates_of(signals: &Signals) -> Option<(f64, f64)> {
    let lat = coord_number(signals.get("latitude"))?;
    let lon = coord_number(signals.get("longitude"))?;
    is_valid_coord_pair(lat, lon).then_some((lat, lon))
}
