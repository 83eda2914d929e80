//! Data types for Zigbee entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Node addresses
//! - Local device identity and network state
//! - Application messages, confirms and announcements

pub mod address;
pub mod device;
pub mod message;

pub use address::{Address, BROADCAST_ALL, Ieee};
pub use device::{
    DeviceInfoItem, DeviceInfoParam, DeviceRole, DeviceState, NetworkState, ResetInfo,
};
pub use message::{DataConfirm, DeviceAnnounce, IncomingMessage};
