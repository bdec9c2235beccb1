//! Telemetry addressing, discovery catalog and raw push samples
//!
//! - **address**: canonical (object, instance, resource) keys
//! - **catalog**: persisted per-VIN set of delivered addresses (14-day TTL)
//! - **bucket**: latest raw push sample per address

pub mod address;
pub mod bucket;
pub mod catalog;

pub use address::{normalize, normalize_key, normalize_value, request_list, TelemetryAddress};
pub use bucket::{RawSample, RawSampleBucket};
pub use catalog::{
    CatalogEntry, CatalogStore, FileCatalogStore, InMemoryCatalogStore, TelemetryCatalog,
    CATALOG_STORAGE_KEY,
};
