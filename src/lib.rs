//! telemetry-sync - live state for connected-vehicle dashboards
//!
//! Keeps one coherent, continuously updated view of every vehicle a user
//! owns, fed by three sources of differing freshness: on-demand snapshot
//! fetches, a push stream, and throttled location/weather enrichment.
//!
//! ## Components
//!
//! - **Telemetry**: address normalization, discovery catalog, raw push samples
//! - **Cache**: per-vehicle cache entries and in-flight request coalescing
//! - **Sync**: the engine, fetch scheduling, deep scans, push ingest, enrichment, polling
//! - **Services**: HTTP backend client and the JSON-lines push bridge

pub mod cache;
pub mod clock;
pub mod config;
#[cfg(any(debug_assertions, feature = "diagnostics"))]
pub mod diagnostics;
pub mod services;
pub mod sync;
pub mod telemetry;
pub mod types;

pub use config::{Args, SyncConfig};
pub use sync::{FetchOutcome, ScanOutcome, SyncEngine};
pub use types::{Result, SyncError, VehicleState, VehicleUpdate};
