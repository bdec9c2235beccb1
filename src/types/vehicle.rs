//! Vehicle metadata and external lookup payloads
//!
//! These mirror what the dashboard backend returns. Numeric fields are
//! parsed leniently because the user-vehicle API mixes numbers and numeric
//! strings between releases.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::state::Signals;

/// One raw entry from the resource-alias catalog
pub type AliasRecord = serde_json::Map<String, Value>;

/// Static vehicle metadata from the user-vehicle list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    pub vin_code: String,
    #[serde(default)]
    pub marketing_name: Option<String>,
    #[serde(default)]
    pub vehicle_variant: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub exterior_color: Option<String>,
    #[serde(default)]
    pub interior_color: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub year_of_product: Option<i64>,
    #[serde(default)]
    pub vehicle_name: Option<String>,
    #[serde(default)]
    pub customized_vehicle_name: Option<String>,
    #[serde(default)]
    pub user_vehicle_type: Option<String>,
    #[serde(default)]
    pub vehicle_image: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub warranty_expiration_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub warranty_mileage: Option<f64>,
    /// Battery capacity in kWh
    #[serde(
        default,
        alias = "battery_capacity",
        alias = "batteryCapacityKwh",
        alias = "batteryCapacityKWH",
        deserialize_with = "lenient_f64"
    )]
    pub battery_capacity: Option<f64>,
    /// Resource-alias schema version used by deep scans
    #[serde(default)]
    pub vehicle_alias_version: Option<String>,
}

impl VehicleInfo {
    /// Create metadata with only a VIN
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin_code: vin.into(),
            ..Default::default()
        }
    }

    /// Alias schema version, defaulting to "1.0"
    pub fn alias_version(&self) -> &str {
        self.vehicle_alias_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("1.0")
    }

    /// Static metadata signals used to seed the vehicle cache
    pub fn metadata_signals(&self) -> Signals {
        let mut out = Signals::new();
        out.insert("vin".into(), Value::from(self.vin_code.clone()));
        put_opt(&mut out, "marketing_name", self.marketing_name.clone());
        put_opt(&mut out, "vehicle_variant", self.vehicle_variant.clone());
        put_opt(
            &mut out,
            "color",
            non_empty(&self.exterior_color).or_else(|| self.color.clone()),
        );
        put_opt(&mut out, "interior_color", self.interior_color.clone());
        put_opt(&mut out, "year_of_product", self.year_of_product);
        put_opt(
            &mut out,
            "customized_vehicle_name",
            non_empty(&self.customized_vehicle_name).or_else(|| self.vehicle_name.clone()),
        );
        put_opt(&mut out, "user_vehicle_type", self.user_vehicle_type.clone());
        put_opt(&mut out, "vehicle_image", self.vehicle_image.clone());
        put_opt(
            &mut out,
            "warranty_expiration_date",
            self.warranty_expiration_date.clone(),
        );
        put_opt(&mut out, "warranty_mileage", self.warranty_mileage);
        // Capacity is always written so a stale value from another vehicle
        // cannot survive a switch.
        out.insert(
            "battery_capacity_kwh".into(),
            self.battery_capacity.map(Value::from).unwrap_or(Value::Null),
        );
        out
    }

    /// Base state for the live view: metadata plus profile image and avatar.
    ///
    /// The avatar falls back to `current_avatar` when the vehicle has no
    /// profile image of its own.
    pub fn base_signals(&self, current_avatar: Option<&Value>) -> Signals {
        let mut out = self.metadata_signals();
        put_opt(&mut out, "profile_image", self.profile_image.clone());
        match non_empty(&self.profile_image) {
            Some(image) => {
                out.insert("user_avatar".into(), Value::from(image));
            }
            None => {
                if let Some(avatar) = current_avatar {
                    out.insert("user_avatar".into(), avatar.clone());
                }
            }
        }
        out
    }
}

/// Authenticated user's profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Reverse-geocoding result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationName {
    #[serde(default)]
    pub location_address: Option<String>,
    #[serde(default)]
    pub weather_address: Option<String>,
}

/// Current weather at a coordinate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub weathercode: Option<i64>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn put_opt<T: Into<Value>>(out: &mut Signals, key: &str, value: Option<T>) {
    if let Some(v) = value {
        out.insert(key.to_string(), v.into());
    }
}

/// Interpret a JSON value as a finite number (numbers or numeric strings)
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(value_as_f64))
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(value_as_f64).map(|n| n.trunc() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_battery_capacity_aliases() {
        let a: VehicleInfo =
            serde_json::from_value(json!({"vinCode": "A", "batteryCapacity": 87.7})).unwrap();
        let b: VehicleInfo =
            serde_json::from_value(json!({"vinCode": "B", "battery_capacity": "42"})).unwrap();
        let c: VehicleInfo =
            serde_json::from_value(json!({"vinCode": "C", "batteryCapacityKWH": ""})).unwrap();

        assert_eq!(a.battery_capacity, Some(87.7));
        assert_eq!(b.battery_capacity, Some(42.0));
        assert_eq!(c.battery_capacity, None);
    }

    #[test]
    fn test_metadata_prefers_exterior_color_and_custom_name() {
        let info: VehicleInfo = serde_json::from_value(json!({
            "vinCode": "VIN1",
            "color": "red",
            "exteriorColor": "#112233",
            "vehicleName": "VF8",
            "customizedVehicleName": "Daily",
            "yearOfProduct": "2023"
        }))
        .unwrap();

        let signals = info.metadata_signals();
        assert_eq!(signals["color"], json!("#112233"));
        assert_eq!(signals["customized_vehicle_name"], json!("Daily"));
        assert_eq!(signals["year_of_product"], json!(2023));
        assert_eq!(signals["battery_capacity_kwh"], Value::Null);
    }

    #[test]
    fn test_base_signals_keeps_current_avatar_without_profile_image() {
        let info = VehicleInfo::new("VIN1");
        let avatar = json!("https://img/avatar.png");
        let signals = info.base_signals(Some(&avatar));
        assert_eq!(signals["user_avatar"], avatar);

        let with_image = VehicleInfo {
            profile_image: Some("https://img/car.png".into()),
            ..VehicleInfo::new("VIN2")
        };
        let signals = with_image.base_signals(Some(&avatar));
        assert_eq!(signals["user_avatar"], json!("https://img/car.png"));
        assert_eq!(signals["profile_image"], json!("https://img/car.png"));
    }

    #[test]
    fn test_alias_version_default() {
        assert_eq!(VehicleInfo::new("A").alias_version(), "1.0");
        let info = VehicleInfo {
            vehicle_alias_version: Some("2.1".into()),
            ..VehicleInfo::new("A")
        };
        assert_eq!(info.alias_version(), "2.1");
    }
}
