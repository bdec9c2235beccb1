//! Persistent catalog of telemetry addresses seen per vehicle
//!
//! Addresses outside the documented signal set are only pushed after a deep
//! scan registers them. Remembering which addresses a vehicle actually
//! delivered lets later scans register a much smaller list. The catalog is
//! persisted through a [`CatalogStore`], loaded lazily on first access, and
//! each VIN's set expires after a fixed TTL (14 days by default).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::address::TelemetryAddress;
use crate::clock::Clock;
use crate::types::{Result, SyncError};

/// Storage key for the serialized catalog
pub const CATALOG_STORAGE_KEY: &str = "telemetry-catalog:v1";

// =============================================================================
// Storage
// =============================================================================

/// Client-scoped key-value store (allows in-memory stand-ins in tests)
pub trait CatalogStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    entries: DashMap<String, String>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a data directory
#[derive(Debug, Clone)]
pub struct FileCatalogStore {
    dir: PathBuf,
}

impl FileCatalogStore {
    /// Create the store, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl CatalogStore for FileCatalogStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        // Temp file + rename keeps the previous copy intact on a failed write
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Known addresses for one vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub keys: BTreeSet<TelemetryAddress>,
    pub last_updated: i64,
}

/// On-disk shape: keys as canonical strings
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    last_updated: Option<i64>,
}

/// VIN -> known telemetry addresses, with TTL and lazy persistence
pub struct TelemetryCatalog {
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    storage_key: String,
    ttl_ms: i64,
    entries: DashMap<String, CatalogEntry>,
    loaded: Once,
}

impl TelemetryCatalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        storage_key: impl Into<String>,
        ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            storage_key: storage_key.into(),
            ttl_ms,
            entries: DashMap::new(),
            loaded: Once::new(),
        }
    }

    /// Unexpired addresses for `vin` (empty when unknown or expired)
    pub fn keys_for(&self, vin: &str) -> BTreeSet<TelemetryAddress> {
        self.ensure_loaded();
        let now = self.clock.now_ms();
        self.entries
            .get(vin)
            .filter(|entry| now - entry.last_updated <= self.ttl_ms)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    /// Add addresses to a VIN's set and restart its TTL
    pub fn add_keys<I>(&self, vin: &str, keys: I)
    where
        I: IntoIterator<Item = TelemetryAddress>,
    {
        if vin.is_empty() {
            return;
        }
        self.ensure_loaded();
        let now = self.clock.now_ms();

        // Union under the entry lock
        let mut entry = self
            .entries
            .entry(vin.to_string())
            .or_insert_with(|| CatalogEntry {
                keys: BTreeSet::new(),
                last_updated: now,
            });
        if now - entry.last_updated > self.ttl_ms {
            entry.keys.clear();
        }
        let before = entry.keys.len();
        entry.keys.extend(keys);
        entry.last_updated = now;
        let after = entry.keys.len();
        drop(entry);

        debug!(vin, before, after, "Updating telemetry catalog");
        self.persist();
    }

    /// All unexpired entries
    pub fn snapshot(&self) -> BTreeMap<String, CatalogEntry> {
        self.ensure_loaded();
        let now = self.clock.now_ms();
        self.entries
            .iter()
            .filter(|e| now - e.last_updated <= self.ttl_ms)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Forget one VIN's set, or the whole catalog including its stored copy
    pub fn clear(&self, vin: Option<&str>) {
        self.ensure_loaded();
        match vin {
            Some(vin) => {
                self.entries.remove(vin);
                self.persist();
            }
            None => {
                self.entries.clear();
                if let Err(e) = self.store.remove(&self.storage_key) {
                    warn!(error = %e, "Failed to remove persisted telemetry catalog");
                }
            }
        }
    }

    fn ensure_loaded(&self) {
        self.loaded.call_once(|| self.load_from_store());
    }

    fn load_from_store(&self) {
        let raw = match self.store.load(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to load telemetry catalog");
                return;
            }
        };

        let parsed: BTreeMap<String, PersistedEntry> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable telemetry catalog");
                return;
            }
        };

        let now = self.clock.now_ms();
        for (vin, entry) in parsed {
            let last_updated = entry.last_updated.unwrap_or(now);
            let keys: BTreeSet<TelemetryAddress> =
                entry.keys.iter().filter_map(|k| k.parse().ok()).collect();
            if vin.is_empty() || keys.is_empty() || now - last_updated > self.ttl_ms {
                continue;
            }
            self.entries.insert(vin, CatalogEntry { keys, last_updated });
        }

        info!(vehicles = self.entries.len(), "Telemetry catalog loaded");
    }

    fn persist(&self) {
        let payload: BTreeMap<String, PersistedEntry> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    PersistedEntry {
                        keys: e.keys.iter().map(|k| k.to_string()).collect(),
                        last_updated: Some(e.last_updated),
                    },
                )
            })
            .collect();

        let result = serde_json::to_string(&payload)
            .map_err(SyncError::from)
            .and_then(|json| self.store.save(&self.storage_key, &json));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist telemetry catalog");
        }
    }
}
