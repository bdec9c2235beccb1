//! Push delivery: raw samples feed the discovery bucket, parsed signals
//! merge into the vehicle's state.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use super::engine::SyncEngine;
use crate::types::{coordinates_of, MergeOptions, Signals, VehicleUpdate};

impl SyncEngine {
    /// Ingest one push delivery for `vin`.
    ///
    /// `raw` holds the per-resource records as delivered; every address seen
    /// there is remembered in the catalog. `parsed` holds the decoded signal
    /// values and is merged with explicit nulls kept. Returns the merge
    /// target, or `None` when nothing was merged.
    pub fn ingest_push(self: &Arc<Self>, vin: &str, parsed: Signals, raw: &[Value]) -> Option<String> {
        if vin.is_empty() {
            debug!("Dropping push delivery without VIN");
            return None;
        }

        if !raw.is_empty() {
            let seen = self.bucket.ingest(vin, raw, self.clock.now_ms());
            let known = self.catalog.keys_for(vin);
            if seen.iter().any(|address| !known.contains(address)) {
                self.catalog.add_keys(vin, self.bucket.addresses(vin));
            }
            trace!(vin, records = raw.len(), seen = seen.len(), "Raw push samples ingested");
        }

        if parsed.is_empty() {
            return None;
        }

        let coordinates = coordinates_of(&parsed);
        let target = self.merge(
            VehicleUpdate::from_payload(Some(vin), parsed),
            MergeOptions::PUSH,
        )?;

        if let Some((latitude, longitude)) = coordinates {
            self.spawn_enrichment(&target, latitude, longitude, false);
        }
        Some(target)
    }
}
