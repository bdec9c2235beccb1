//! The synchronization engine and its merge routing
//!
//! One `SyncEngine` exists per client session and owns every registry the
//! sync protocol needs: the live view, the per-vehicle cache, the in-flight
//! registries, the discovery catalog and the enrichment history. Dropping
//! the engine (on logout) drops all of it.
//!
//! ## Merge routing
//!
//! Every update is written to the target vehicle's cache entry. It reaches
//! the live view only when the target is the active vehicle at merge time,
//! so a late response for a vehicle the user switched away from can never
//! show up on another vehicle's dashboard.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::discovery::FullTelemetry;
use super::enrich::{EnrichAttempt, EnrichDecision};
use super::indicator::{ActivityIndicator, ANY_VEHICLE};
use super::poll::RefreshTimer;
use super::scheduler::FetchOutcome;
use crate::cache::{CacheEntry, RequestCoalescer};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::services::{ApiClient, PushClient};
use crate::telemetry::{CatalogStore, RawSampleBucket, TelemetryCatalog};
use crate::types::{MergeOptions, VehicleInfo, VehicleState, VehicleUpdate};

/// Session-scoped telemetry synchronization engine
pub struct SyncEngine {
    pub(crate) api: Arc<dyn ApiClient>,
    pub(crate) push: Arc<dyn PushClient>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SyncConfig,
    session_id: Uuid,

    /// Live view; observers hold receivers
    pub(crate) live: watch::Sender<VehicleState>,
    pub(crate) vehicles: RwLock<Vec<VehicleInfo>>,
    pub(crate) cache: DashMap<String, CacheEntry>,
    pub(crate) full_telemetry: DashMap<String, FullTelemetry>,

    pub(crate) catalog: TelemetryCatalog,
    pub(crate) bucket: RawSampleBucket,

    pub(crate) fetches: RequestCoalescer<FetchOutcome>,
    pub(crate) enrichments: RequestCoalescer<EnrichDecision>,
    pub(crate) enrich_attempts: DashMap<String, EnrichAttempt>,

    pub(crate) refreshing: ActivityIndicator,
    pub(crate) scanning: ActivityIndicator,
    pub(crate) enriching: ActivityIndicator,
    pub(crate) refresh_timer: RefreshTimer,
}

impl SyncEngine {
    /// Create an engine on the system clock
    pub fn new(
        api: Arc<dyn ApiClient>,
        push: Arc<dyn PushClient>,
        store: Arc<dyn CatalogStore>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Self::with_clock(api, push, store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        api: Arc<dyn ApiClient>,
        push: Arc<dyn PushClient>,
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let session_id = Uuid::new_v4();
        let catalog = TelemetryCatalog::new(
            store,
            Arc::clone(&clock),
            config.catalog_storage_key.clone(),
            config.catalog_ttl_ms,
        );
        let (live, _) = watch::channel(VehicleState::default());

        info!(
            session = %session_id,
            poll_interval_secs = config.poll_interval.as_secs(),
            "Telemetry sync engine created"
        );

        Arc::new(Self {
            api,
            push,
            clock,
            refresh_timer: RefreshTimer::new(config.poll_interval),
            config,
            session_id,
            live,
            vehicles: RwLock::new(Vec::new()),
            cache: DashMap::new(),
            full_telemetry: DashMap::new(),
            catalog,
            bucket: RawSampleBucket::new(),
            fetches: RequestCoalescer::new("telemetry-fetch"),
            enrichments: RequestCoalescer::new("location-enrich"),
            enrich_attempts: DashMap::new(),
            refreshing: ActivityIndicator::new(),
            scanning: ActivityIndicator::new(),
            enriching: ActivityIndicator::new(),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current live view
    pub fn state(&self) -> VehicleState {
        self.live.borrow().clone()
    }

    /// Observe the live view
    pub fn subscribe(&self) -> watch::Receiver<VehicleState> {
        self.live.subscribe()
    }

    pub fn active_vin(&self) -> Option<String> {
        self.live.borrow().vin.clone()
    }

    /// Known vehicles, in list order
    pub async fn vehicles(&self) -> Vec<VehicleInfo> {
        self.vehicles.read().await.clone()
    }

    pub async fn vehicle(&self, vin: &str) -> Option<VehicleInfo> {
        self.vehicles
            .read()
            .await
            .iter()
            .find(|v| v.vin_code == vin)
            .cloned()
    }

    pub fn cache_entry(&self, vin: &str) -> Option<CacheEntry> {
        self.cache.get(vin).map(|entry| entry.clone())
    }

    /// Most recent successful deep scan for `vin`
    pub fn full_telemetry(&self, vin: &str) -> Option<FullTelemetry> {
        self.full_telemetry.get(vin).map(|snapshot| snapshot.clone())
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Merge a partial update into the target vehicle's cache entry, and into
    /// the live view when the target is active.
    ///
    /// Returns the target VIN, or `None` when the update names no vehicle and
    /// none is active.
    pub fn merge(&self, update: VehicleUpdate, options: MergeOptions) -> Option<String> {
        let incoming = update.sanitized(options);
        let Some(target) = update
            .vin
            .filter(|vin| !vin.is_empty())
            .or_else(|| self.active_vin())
        else {
            debug!("Dropping update with no target vehicle");
            return None;
        };
        let stamp = update
            .last_updated
            .unwrap_or_else(|| self.clock.now_ms());
        let changed = incoming.len();

        // The cache entry stays locked while the live view is overlaid so
        // concurrent merges reach both in the same order.
        let mut entry = self.cache.entry(target.clone()).or_default();
        entry.signals.extend(incoming);
        entry
            .signals
            .insert("vin".to_string(), Value::from(target.clone()));
        entry.last_updated = Some(stamp);

        let live = self.live.send_if_modified(|state| {
            if state.vin.as_deref() != Some(target.as_str()) {
                return false;
            }
            state
                .signals
                .extend(entry.signals.iter().map(|(k, v)| (k.clone(), v.clone())));
            state.last_updated = stamp;
            true
        });
        drop(entry);

        debug!(vin = %target, signals = changed, live, "Merged vehicle update");
        Some(target)
    }

    // =========================================================================
    // Activity flags
    // =========================================================================

    /// Hold an activity flag until the returned guard drops.
    ///
    /// `key` is a VIN, or [`ANY_VEHICLE`] for flags shared by every vehicle.
    /// Per-VIN flags only show on the live view while that VIN is active.
    pub(crate) fn begin_activity(self: &Arc<Self>, activity: Activity, key: &str) -> ActivityGuard {
        // Count and flag change together under the watch lock
        let indicator = self.indicator(activity);
        self.live
            .send_if_modified(|state| indicator.enter(key) && show_activity(state, activity, key, true));
        ActivityGuard {
            engine: Arc::clone(self),
            activity,
            key: key.to_string(),
        }
    }

    fn indicator(&self, activity: Activity) -> &ActivityIndicator {
        match activity {
            Activity::Refreshing => &self.refreshing,
            Activity::Scanning => &self.scanning,
            Activity::Enriching => &self.enriching,
        }
    }
}

/// Set an activity flag on the live view if `key` covers the active vehicle
fn show_activity(state: &mut VehicleState, activity: Activity, key: &str, on: bool) -> bool {
    let applies = key == ANY_VEHICLE || state.vin.as_deref() == Some(key);
    if !applies {
        return false;
    }
    let flag = activity.flag(state);
    let changed = *flag != on;
    *flag = on;
    changed
}

/// Activities reflected as flags on the live view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Refreshing,
    Scanning,
    Enriching,
}

impl Activity {
    fn flag(self, state: &mut VehicleState) -> &mut bool {
        match self {
            Activity::Refreshing => &mut state.is_refreshing,
            Activity::Scanning => &mut state.is_scanning,
            Activity::Enriching => &mut state.is_enriching,
        }
    }
}

/// Releases an activity flag on drop, including when the holder unwinds
pub(crate) struct ActivityGuard {
    engine: Arc<SyncEngine>,
    activity: Activity,
    key: String,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let indicator = self.engine.indicator(self.activity);
        let (activity, key) = (self.activity, self.key.as_str());
        self.engine
            .live
            .send_if_modified(|state| indicator.exit(key) && show_activity(state, activity, key, false));
    }
}
