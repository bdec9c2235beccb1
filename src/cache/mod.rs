//! In-memory caching primitives
//!
//! - **coalesce**: per-key in-flight registry (N callers -> 1 operation)
//! - **vehicle_cache**: per-vehicle cache entries and freshness rules

pub mod coalesce;
pub mod vehicle_cache;

pub use coalesce::RequestCoalescer;
pub use vehicle_cache::{
    is_meaningful, telemetry_baseline, CacheEntry, SESSION_SIGNALS, TELEMETRY_SIGNALS,
};
