//! Telemetry address normalization
//!
//! Signal addresses arrive in many historical encodings: a single
//! `deviceKey` such as `"34183_1_10"` or `"/34183/1/10"`, or separate
//! object/instance/resource fields spelled `objectId`, `object_id`,
//! `devObjID`, `objID` and so on, in any letter case. Every ingestion path
//! funnels through [`normalize`] so that the same sample delivered by
//! polling and by push lands in the same slot.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::types::{Result, SyncError};

// =============================================================================
// Field aliases
// =============================================================================

const DELIMITED_KEYS: &[&str] = &["deviceKey", "device_key", "path"];

const OBJECT_KEYS: &[&str] = &[
    "objectId", "object_id", "devObjID", "devObjId", "objID", "objId", "oid", "object",
];

const INSTANCE_KEYS: &[&str] = &[
    "instanceId",
    "instance_id",
    "devObjInstID",
    "devObjInstId",
    "instID",
    "iid",
    "instance",
];

const RESOURCE_KEYS: &[&str] = &[
    "resourceId",
    "resource_id",
    "devRsrcID",
    "devRsrcId",
    "rsrcID",
    "rsrcId",
    "rid",
    "devRsrc",
    "resource",
];

// =============================================================================
// TelemetryAddress
// =============================================================================

/// One reportable signal: (object, instance, resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TelemetryAddress {
    pub object_id: i64,
    pub instance_id: i64,
    pub resource_id: i64,
}

impl TelemetryAddress {
    pub fn new(object_id: i64, instance_id: i64, resource_id: i64) -> Self {
        Self {
            object_id,
            instance_id,
            resource_id,
        }
    }

    /// Underscore form used by the vehicle gateway, e.g. `34183_1_10`
    pub fn device_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.object_id, self.instance_id, self.resource_id
        )
    }

    /// Request object accepted by the resource-registration endpoint
    pub fn to_request_object(&self) -> Value {
        json!({
            "objectId": self.object_id.to_string(),
            "instanceId": self.instance_id.to_string(),
            "resourceId": self.resource_id.to_string(),
        })
    }
}

impl fmt::Display for TelemetryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.object_id, self.instance_id, self.resource_id
        )
    }
}

impl FromStr for TelemetryAddress {
    type Err = SyncError;

    /// Parse a canonical `object|instance|resource` key
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('|');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.trim().parse::<i64>().ok())
                .ok_or_else(|| SyncError::Parse(format!("Invalid telemetry key: {}", s)))
        };
        let address = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(SyncError::Parse(format!("Invalid telemetry key: {}", s)));
        }
        Ok(address)
    }
}

impl Serialize for TelemetryAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TelemetryAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Canonicalize a raw record into an address.
///
/// Returns `None` when the object or resource id cannot be resolved to an
/// integer. The instance id defaults to 0.
pub fn normalize(record: &Map<String, Value>) -> Option<TelemetryAddress> {
    if let Some(address) = from_delimited(record) {
        return Some(address);
    }

    let object_id = lookup(record, OBJECT_KEYS).and_then(parse_leading_int)?;
    let resource_id = lookup(record, RESOURCE_KEYS).and_then(parse_leading_int)?;
    let instance_id = lookup(record, INSTANCE_KEYS)
        .and_then(parse_leading_int)
        .unwrap_or(0);

    Some(TelemetryAddress::new(object_id, instance_id, resource_id))
}

/// [`normalize`] for an arbitrary JSON value (non-objects are invalid)
pub fn normalize_value(value: &Value) -> Option<TelemetryAddress> {
    value.as_object().and_then(normalize)
}

/// Canonical `object|instance|resource` key, or `None` if invalid
pub fn normalize_key(value: &Value) -> Option<String> {
    normalize_value(value).map(|a| a.to_string())
}

/// Deduplicated addresses for a list of records, in first-seen order.
/// Invalid records are skipped.
pub fn request_list<'a, I>(records: I) -> Vec<TelemetryAddress>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter_map(normalize)
        .filter(|address| seen.insert(*address))
        .collect()
}

fn from_delimited(record: &Map<String, Value>) -> Option<TelemetryAddress> {
    let raw = lookup(record, DELIMITED_KEYS)?.as_str()?;
    let joined = raw.trim().replace('/', "_");
    let parts: Vec<&str> = joined.split('_').filter(|p| !p.is_empty()).collect();
    if parts.len() != 3 {
        return None;
    }

    let object_id = parse_int_str(parts[0])?;
    let resource_id = parse_int_str(parts[2])?;
    let instance_id = parse_int_str(parts[1]).unwrap_or(0);
    Some(TelemetryAddress::new(object_id, instance_id, resource_id))
}

/// Exact-case lookup first, then a case-insensitive scan of the record.
/// `null` and empty strings count as missing.
fn lookup<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        if let Some(value) = record.get(*key).filter(|v| is_present(v)) {
            return Some(value);
        }
        let wanted = key.to_lowercase();
        if let Some((_, value)) = record
            .iter()
            .find(|(k, v)| k.to_lowercase() == wanted && is_present(v))
        {
            return Some(value);
        }
    }
    None
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Leading-integer parse: `"0012"` -> 12, `"12abc"` -> 12, `3.9` -> 3
pub fn parse_leading_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => parse_int_str(s),
        _ => None,
    }
}

fn parse_int_str(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (sign, rest) = match s.as_bytes().first()? {
        b'-' => (-1, &s[1..]),
        b'+' => (1, &s[1..]),
        _ => (1, s),
    };
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|n| sign * n)
}
