//! Services layer for telemetry-sync
//!
//! Collaborators the engine talks to, behind the [`ApiClient`] and
//! [`PushClient`] traits.
//!
//! ## Services
//!
//! - **HttpApiClient**: dashboard backend, reverse geocoding and weather over HTTP
//! - **StdioPushBridge**: push deliveries and subscriptions as JSON lines

pub mod client;
pub mod http;
pub mod stdio_push;

pub use client::{ApiClient, NoopPushClient, PushClient};
pub use http::{HttpApiClient, HttpApiConfig};
pub use stdio_push::{run_push_reader, spawn_push_reader, PushDelivery, StdioPushBridge};
