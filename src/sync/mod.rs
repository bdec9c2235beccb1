//! Vehicle state synchronization
//!
//! ## Components
//!
//! - **Engine**: live view, per-vehicle cache and merge routing
//! - **Scheduler**: coalesced snapshot fetches, vehicle switching, prefetch
//! - **Discovery**: deep scans for resources outside the core signal set
//! - **Push**: ingestion of push deliveries
//! - **Enrich**: throttled reverse geocoding and weather
//! - **Poll**: periodic refresh of the active vehicle

pub mod discovery;
pub mod engine;
pub mod enrich;
pub mod indicator;
pub mod poll;
pub mod push;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use discovery::{is_scan_candidate, FullTelemetry, ScanOutcome};
pub use engine::SyncEngine;
pub use enrich::{haversine_m, EnrichAttempt, EnrichDecision};
pub use indicator::{ActivityIndicator, ANY_VEHICLE};
pub use poll::{spawn_poll_task, RefreshTimer};
pub use scheduler::FetchOutcome;
