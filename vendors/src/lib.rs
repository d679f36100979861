//! HTTP request executor for the telemetry service
//!
//! This crate provides the `RequestExecutor` used by the arrival-bench
//! binary:
//!
//! - [`Endpoint`]: the service endpoints a stream's `exec` can name
//! - [`TelemetryExecutor`]: issues requests over a shared reqwest client
//! - [`DeviceRegistry`]: CSV list of devices, bound per worker

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod devices;
pub mod endpoint;
pub mod executor;

pub use client::HttpConfig;
pub use devices::{Device, DeviceRegistry, RegistryError};
pub use endpoint::{Endpoint, TelemetryPayload};
pub use executor::TelemetryExecutor;
