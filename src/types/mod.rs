//! Shared types for telemetry-sync

pub mod error;
pub mod state;
pub mod vehicle;

pub use error::{Result, SyncError};
pub use state::{
    coordinates_of, is_valid_coord_pair, MergeOptions, Signals, VehicleState, VehicleUpdate,
};
pub use vehicle::{AliasRecord, LocationName, UserProfile, VehicleInfo, WeatherReport};
