//! # zigbee-host
//!
//! A Rust host-side driver for Zigbee network processors attached over a
//! serial link.
//!
//! The driver owns the byte stream to the radio, decodes frames on a
//! background task and correlates each reply or notification with whoever
//! is waiting for it.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Request/reply correlation with bounded waits
//! - Long-lived subscriptions for application messages
//! - Bring-up of coordinator, router and end-device roles
//! - Comprehensive error handling
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use zigbee_host::{Address, ClusterCommand, Driver, DriverConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zigbee_host::Error> {
//!     // Open the radio and bring the network up
//!     let driver = Driver::init(DriverConfig::new("/dev/ttyACM0")).await?;
//!     println!("Running as {}", driver.device_state().ieee);
//!
//!     // Toggle an on/off light
//!     let reply = driver
//!         .send_cluster_command(ClusterCommand {
//!             address: Address::Short(0x1234),
//!             dst_endpoint: 1,
//!             src_endpoint: 1,
//!             profile_id: 0x0104,
//!             cluster_id: 0x0006,
//!             control: 0x01,
//!             command: 0x02,
//!             sequence: None,
//!             manufacturer_code: None,
//!             payload: &[],
//!             timeout: Duration::from_secs(3),
//!         })
//!         .await?;
//!     println!("Reply: {reply:?}");
//!
//!     driver.finalize().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transport`] - Buffered reads and the serial port
//! - [`protocol`] - Frame codecs, command codes and payload parsers
//! - [`types`] - Data structures (addresses, device state, messages)
//! - [`dispatch`] - Correlators and the tables that route frames to them
//! - [`reader`] - The background task that decodes and routes frames
//! - [`commands`] - Command handler for device operations
//! - [`bringup`] - The start-up sequence
//! - [`config`] - Driver configuration
//! - [`client`] - High-level [`Driver`]

pub mod bringup;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod transport;
pub mod types;

#[cfg(test)]
mod sim;

// Re-exports for convenience
pub use client::Driver;
pub use commands::{ClusterCommand, CommandHandler};
pub use config::{DriverConfig, EndpointDescriptor, NetworkConfig, StartupOptions, Timeouts};
pub use dispatch::{Completion, Correlator, MatchCriteria, Payload};
pub use error::{Error, FrameError, Result};
pub use protocol::{ByteOrder, CommandCode, Frame, ZclFrame};
pub use transport::{SerialConfig, list_ports};
pub use types::{
    Address, DataConfirm, DeviceAnnounce, DeviceInfoParam, DeviceRole, DeviceState, Ieee,
    IncomingMessage, NetworkState, ResetInfo,
};
