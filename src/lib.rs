//! Simulated crane IoT device for Azure IoT Hub
//!
//! The simulator runs two concurrent pieces for the lifetime of the process:
//!
//! - a telemetry loop that synthesizes a crane reading every tick, publishes
//!   it to the hub and waits for the delivery acknowledgement before pacing
//!   itself by the configured interval
//! - a direct method listener that lets the hub change the telemetry
//!   interval and the height increment while the loop is running
//!
//! Both sides share a [`config::SharedConfig`]; the method handler writes it,
//! the loop reads it on every tick.
//!
//! # Examples
//!
//! ```no_run
//! use simulated_crane::client::HubClient;
//! use simulated_crane::config::SharedConfig;
//! use simulated_crane::telemetry::TelemetryLoop;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> simulated_crane::Result<()> {
//!     let client = HubClient::from_connection_string(
//!         "HostName=iothubname.azure-devices.net;DeviceId=MyCrane;SharedAccessKey=TheAccessKey",
//!     )
//!     .await?;
//!
//!     let shared = Arc::new(SharedConfig::default());
//!     let (_stop, stopped) = watch::channel(false);
//!
//!     TelemetryLoop::new(client, "MyCrane".into(), shared, Duration::from_secs(30))
//!         .run(stopped)
//!         .await
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// Crate version reported in logs
pub const SIMULATOR_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// The IoT Hub client
pub mod client;
/// Direct method dispatch
pub mod command;
/// Startup and shared runtime configuration
pub mod config;
/// Message types for communicating with the IoT Hub
pub mod message;
pub(crate) mod mqtt_transport;
/// Telemetry synthesis and the send loop
pub mod telemetry;
/// SAS token generation
pub mod token;
/// Transport types
pub mod transport;

/// Errors
pub mod error;

/// Result type alias using this crate's [`error::Error`]
pub type Result<T> = std::result::Result<T, error::Error>;
