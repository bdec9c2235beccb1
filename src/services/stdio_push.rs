//! Line-delimited JSON push bridge
//!
//! Lets a host process that owns the live push connection feed the engine
//! over pipes. Each input line is one delivery:
//!
//! ```json
//! {"vin": "VF...", "parsed": {"speed": 42}, "raw": [{"deviceKey": "34183_1_10", "value": 1}]}
//! ```
//!
//! Subscription changes go the other way as `{"subscribe": "<vin>"}` lines.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::PushClient;
use crate::sync::SyncEngine;
use crate::types::{Result, Signals};

/// One push delivery as read from the input stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushDelivery {
    #[serde(alias = "vinCode")]
    pub vin: String,
    #[serde(default)]
    pub parsed: Signals,
    #[serde(default)]
    pub raw: Vec<Value>,
}

/// Writes subscription requests to the host as JSON lines
pub struct StdioPushBridge<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> StdioPushBridge<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> PushClient for StdioPushBridge<W> {
    async fn switch_subscription(&self, vin: &str) -> Result<()> {
        let mut line = serde_json::to_vec(&json!({ "subscribe": vin }))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        debug!(vin, "Requested push subscription");
        Ok(())
    }
}

/// Feed deliveries from `reader` into the engine until end of input.
///
/// Malformed lines are logged and skipped. Returns the number of
/// deliveries ingested.
pub async fn run_push_reader<R>(engine: Arc<SyncEngine>, reader: R) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut ingested = 0u64;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PushDelivery>(line) {
            Ok(delivery) => {
                engine.ingest_push(&delivery.vin, delivery.parsed, &delivery.raw);
                ingested += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed push line"),
        }
    }
    info!(ingested, "Push input closed");
    Ok(ingested)
}

/// Spawn [`run_push_reader`] on the process's stdin
pub fn spawn_push_reader(engine: Arc<SyncEngine>) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        run_push_reader(engine, stdin).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::services::NoopPushClient;
    use crate::telemetry::InMemoryCatalogStore;
    use serde_json::json;
    use tokio_test::assert_ok;

    struct NoApi;

    #[async_trait::async_trait]
    impl crate::services::ApiClient for NoApi {
        async fn get_vehicles(&self) -> Result<Vec<crate::types::VehicleInfo>> {
            Ok(Vec::new())
        }
        async fn get_user_profile(&self) -> Result<crate::types::UserProfile> {
            Ok(Default::default())
        }
        async fn get_telemetry(&self, _vin: &str) -> Result<Signals> {
            Ok(Signals::new())
        }
        async fn get_aliases(&self, _vin: &str, _v: &str) -> Result<Vec<crate::types::AliasRecord>> {
            Ok(Vec::new())
        }
        async fn register_resources(
            &self,
            _vin: &str,
            _addresses: &[crate::telemetry::TelemetryAddress],
        ) -> Result<()> {
            Ok(())
        }
        async fn fetch_location_name(&self, _lat: f64, _lon: f64) -> Result<crate::types::LocationName> {
            Ok(Default::default())
        }
        async fn fetch_weather(&self, _lat: f64, _lon: f64) -> Result<crate::types::WeatherReport> {
            Ok(Default::default())
        }
    }

    fn engine() -> Arc<SyncEngine> {
        SyncEngine::new(
            Arc::new(NoApi),
            Arc::new(NoopPushClient),
            Arc::new(InMemoryCatalogStore::new()),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_subscription_written_as_json_line() {
        let bridge = StdioPushBridge::new(Vec::new());
        assert_ok!(bridge.switch_subscription("VIN1").await);
        assert_ok!(bridge.switch_subscription("VIN2").await);

        let written = String::from_utf8(bridge.into_inner()).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![json!({"subscribe": "VIN1"}), json!({"subscribe": "VIN2"})]);
    }

    #[tokio::test]
    async fn test_reader_ingests_and_skips_garbage() {
        let engine = engine();
        let input = concat!(
            r#"{"vin": "VIN1", "parsed": {"speed": 42}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"vinCode": "VIN1", "raw": [{"deviceKey": "34183_1_10", "value": 1}]}"#,
            "\n",
        );

        let ingested = assert_ok!(run_push_reader(Arc::clone(&engine), input.as_bytes()).await);

        assert_eq!(ingested, 2);
        assert_eq!(engine.cache_entry("VIN1").unwrap().signals["speed"], json!(42));
        assert_eq!(engine.bucket.len("VIN1"), 1);
    }
}
