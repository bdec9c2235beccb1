//! Per-vehicle cache entries, freshness and the telemetry-reset baseline

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{AliasRecord, Signals};

/// Signals that count as "real telemetry" when judging cache freshness
pub const TELEMETRY_SIGNALS: &[&str] = &[
    "battery_level",
    "range",
    "speed",
    "odometer",
    "remaining_charging_time",
    "battery_health_12v",
    "soh_percentage",
    "tire_pressure_fl",
    "tire_pressure_fr",
    "tire_pressure_rl",
    "tire_pressure_rr",
    "battery_capacity_kwh",
    "latitude",
    "longitude",
    "outside_temp",
    "inside_temp",
];

/// Session-level signals carried across vehicle switches
pub const SESSION_SIGNALS: &[&str] = &["user_name", "user_avatar"];

/// Placeholder text for unknown version strings
const UNKNOWN_TEXT: &str = "--";

/// Everything known about one vehicle, active or not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub signals: Signals,
    /// `None` until a merge stamps the entry, and again after a forced refresh
    pub last_updated: Option<i64>,
    /// Deep-scan candidates from the most recent scan
    pub candidates: Option<Vec<AliasRecord>>,
}

impl CacheEntry {
    pub fn from_signals(signals: Signals) -> Self {
        Self {
            signals,
            ..Default::default()
        }
    }

    /// Fresh when stamped within `ttl_ms` (and not beyond `future_skew_ms`
    /// ahead of `now`) and holding at least one meaningful telemetry value
    pub fn is_fresh(&self, now: i64, ttl_ms: i64, future_skew_ms: i64) -> bool {
        let Some(stamped) = self.last_updated else {
            return false;
        };
        if stamped > now + future_skew_ms || now - stamped > ttl_ms {
            return false;
        }
        TELEMETRY_SIGNALS
            .iter()
            .filter_map(|key| self.signals.get(*key))
            .any(is_meaningful)
    }
}

/// Finite number, boolean, or non-blank string other than `--`
pub fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(f64::is_finite),
        Value::Bool(_) => true,
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && s != UNKNOWN_TEXT
        }
        _ => false,
    }
}

/// Telemetry values shown for a vehicle before anything is known about it.
///
/// Applied on every switch so no telemetry from the previous vehicle survives.
pub fn telemetry_baseline(default_location: (f64, f64)) -> Signals {
    const NULL_SIGNALS: &[&str] = &[
        "battery_level",
        "range",
        "odometer",
        "speed",
        "gear_position",
        "is_locked",
        "climate_driver_temp",
        "climate_passenger_temp",
        "fan_speed",
        "outside_temp",
        "inside_temp",
        "tire_pressure_fl",
        "tire_temp_fl",
        "tire_pressure_fr",
        "tire_temp_fr",
        "tire_pressure_rl",
        "tire_temp_rl",
        "tire_pressure_rr",
        "tire_temp_rr",
        "target_soc",
        "remaining_charging_time",
        "soh_percentage",
        "battery_health_12v",
        "battery_nominal_capacity_kwh",
        "battery_serial",
        "battery_manufacture_date",
        "ignition_status",
        "next_service_mileage",
        "next_service_date",
        "service_appointment_id",
        "service_appointment_status",
        "location_address",
        "weather_address",
        "weather_outside_temp",
        "weather_code",
    ];
    const FALSE_SIGNALS: &[&str] = &[
        "charging_status",
        "door_fl",
        "door_fr",
        "door_rl",
        "door_rr",
        "trunk_status",
        "hood_status",
        "handbrake_status",
    ];
    const UNKNOWN_TEXT_SIGNALS: &[&str] = &[
        "battery_type",
        "bms_version",
        "gateway_version",
        "ecu_head_unit",
        "mhu_version",
        "vcu_version",
        "bcm_version",
        "firmware_version",
        "tbox_version",
    ];
    const ZERO_SIGNALS: &[&str] = &["heading", "thermal_warning", "service_alert"];

    let mut baseline = Signals::new();
    for key in NULL_SIGNALS {
        baseline.insert((*key).into(), Value::Null);
    }
    for key in FALSE_SIGNALS {
        baseline.insert((*key).into(), Value::Bool(false));
    }
    for key in UNKNOWN_TEXT_SIGNALS {
        baseline.insert((*key).into(), json!(UNKNOWN_TEXT));
    }
    for key in ZERO_SIGNALS {
        baseline.insert((*key).into(), json!(0));
    }
    let (lat, lon) = default_location;
    baseline.insert("latitude".into(), json!(lat));
    baseline.insert("longitude".into(), json!(lon));
    baseline
}
