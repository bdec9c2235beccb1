//! HTTP implementation of [`ApiClient`]
//!
//! Talks to the dashboard backend for vehicle data and resource
//! registration, to a Nominatim-compatible service for reverse geocoding,
//! and to an Open-Meteo-compatible service for weather.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::client::ApiClient;
use crate::config::Args;
use crate::telemetry::TelemetryAddress;
use crate::types::{
    AliasRecord, LocationName, Result, Signals, SyncError, UserProfile, VehicleInfo, WeatherReport,
};

const ALIAS_PATH: &str = "/api/proxy/modelmgmt/api/v2/vehicle-model/mobile-app/vehicle/get-alias";
const REGISTER_PATH: &str = "/api/proxy/ccaraccessmgmt/api/v1/telemetry/app/ping";
const VIN_HEADER: &str = "x-vin-code";

/// Place fields that name a locality, most specific first
const LOCALITY_FIELDS: &[&str] = &["city", "town", "village", "county", "state"];

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub geocode_url: String,
    pub weather_url: String,
    pub request_timeout: Duration,
}

impl HttpApiConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            base_url: args.api_base_url.trim_end_matches('/').to_string(),
            access_token: args.access_token.clone().filter(|t| !t.is_empty()),
            geocode_url: args.geocode_url.clone(),
            weather_url: args.weather_url.clone(),
            request_timeout: args.request_timeout(),
        }
    }
}

pub struct HttpApiClient {
    config: HttpApiConfig,
    http_client: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(config: HttpApiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("telemetry-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.authorized(self.http_client.get(self.url(path)));
        let body = read_json(request.send().await?).await?;
        serde_json::from_value(unwrap_envelope(body)).map_err(SyncError::from)
    }
}

/// Fail on non-success status, otherwise decode the body
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SyncError::Api(format!("{} {}", status, body.trim())));
    }
    Ok(response.json().await?)
}

/// Backend responses wrap their payload in `{"data": ...}`
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Alias catalogs come either as an array or as `{"resources": [...]}`
fn parse_alias_records(body: Value) -> Vec<AliasRecord> {
    let list = match unwrap_envelope(body) {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("resources") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    list.into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .collect()
}

fn parse_location(body: &Value) -> LocationName {
    let text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let address = body.get("address");
    LocationName {
        location_address: text(body.get("display_name")),
        weather_address: LOCALITY_FIELDS
            .iter()
            .find_map(|field| text(address.and_then(|a| a.get(*field)))),
    }
}

fn parse_weather(body: Value) -> Result<WeatherReport> {
    match body {
        Value::Object(mut map) => match map.remove("current_weather") {
            Some(current) => Ok(serde_json::from_value(current)?),
            None => Err(SyncError::Parse("missing current_weather".into())),
        },
        _ => Err(SyncError::Parse("weather response is not an object".into())),
    }
}

#[async_trait::async_trait]
impl ApiClient for HttpApiClient {
    async fn get_vehicles(&self) -> Result<Vec<VehicleInfo>> {
        self.get_json("/api/vehicles").await
    }

    async fn get_user_profile(&self) -> Result<UserProfile> {
        self.get_json("/api/user").await
    }

    async fn get_telemetry(&self, vin: &str) -> Result<Signals> {
        let body: Value = self.get_json(&format!("/api/telemetry/{}", vin)).await?;
        match body {
            Value::Object(signals) => Ok(signals),
            Value::Null => Ok(Signals::new()),
            _ => Err(SyncError::Parse("telemetry payload is not an object".into())),
        }
    }

    async fn get_aliases(&self, vin: &str, version: &str) -> Result<Vec<AliasRecord>> {
        let request = self
            .http_client
            .get(self.url(ALIAS_PATH))
            .query(&[("version", version)])
            .header(VIN_HEADER, vin);
        let body = read_json(self.authorized(request).send().await?).await?;
        let records = parse_alias_records(body);
        debug!(vin, version, count = records.len(), "Fetched alias catalog");
        Ok(records)
    }

    async fn register_resources(&self, vin: &str, addresses: &[TelemetryAddress]) -> Result<()> {
        let body: Vec<Value> = addresses.iter().map(TelemetryAddress::to_request_object).collect();
        let request = self
            .http_client
            .post(self.url(REGISTER_PATH))
            .header(VIN_HEADER, vin)
            .json(&body);
        read_json(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn fetch_location_name(&self, latitude: f64, longitude: f64) -> Result<LocationName> {
        let request = self.http_client.get(&self.config.geocode_url).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
        ]);
        let body = read_json(request.send().await?).await?;
        Ok(parse_location(&body))
    }

    async fn fetch_weather(&self, latitude: f64, longitude: f64) -> Result<WeatherReport> {
        let request = self.http_client.get(&self.config.weather_url).query(&[
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("current_weather", "true".to_string()),
        ]);
        parse_weather(read_json(request.send().await?).await?)
    }
}
