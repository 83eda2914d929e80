//! Driver configuration.
//!
//! Everything here is a plain value with builder-style setters; nothing is
//! read from the environment or from files.

use std::time::Duration;

use crate::protocol::wire::ByteOrder;
use crate::transport::{DEFAULT_READ_TIMEOUT, SerialConfig};
use crate::types::DeviceRole;

/// Home Automation profile id.
pub const PROFILE_HOME_AUTOMATION: u16 = 0x0104;

/// Default PAN id; 0xFFFF lets the coordinator pick one.
pub const DEFAULT_PAN_ID: u16 = 0xFFFF;

/// Default channel mask (channel 20).
pub const DEFAULT_CHANNEL_MASK: u32 = 0x0010_0000;

/// Deadlines for the driver's bounded waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Synchronous request/reply exchanges.
    pub command: Duration,
    /// Reset request to reset indication.
    pub reset: Duration,
    /// Network start to target state.
    pub network_start: Duration,
    /// Data request to data confirm.
    pub data_confirm: Duration,
    /// Single transport read inside the reader loop.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeouts {
    /// Creates the default timeouts.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command: Duration::from_secs(5),
            reset: Duration::from_secs(5),
            network_start: Duration::from_secs(20),
            data_confirm: Duration::from_secs(5),
            read: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn command(mut self, timeout: Duration) -> Self {
        self.command = timeout;
        self
    }

    /// Sets the reset timeout.
    #[must_use]
    pub const fn reset(mut self, timeout: Duration) -> Self {
        self.reset = timeout;
        self
    }

    /// Sets the network start timeout.
    #[must_use]
    pub const fn network_start(mut self, timeout: Duration) -> Self {
        self.network_start = timeout;
        self
    }

    /// Sets the data confirm timeout.
    #[must_use]
    pub const fn data_confirm(mut self, timeout: Duration) -> Self {
        self.data_confirm = timeout;
        self
    }

    /// Sets the per-read timeout of the reader loop.
    #[must_use]
    pub const fn read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }
}

/// Startup option bits written to the radio's startup NV item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupOptions(u8);

impl StartupOptions {
    /// No options.
    pub const NONE: Self = Self(0);

    /// Erase network configuration on the next start.
    pub const CLEAR_CONFIG: Self = Self(1 << 0);

    /// Erase network state on the next start.
    pub const CLEAR_STATE: Self = Self(1 << 1);

    /// Creates options from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if an option is set.
    #[must_use]
    pub const fn contains(self, option: Self) -> bool {
        (self.0 & option.0) == option.0
    }

    /// Returns these options with `option` added.
    #[must_use]
    pub const fn with(self, option: Self) -> Self {
        Self(self.0 | option.0)
    }

    /// Returns these options with `option` removed.
    #[must_use]
    pub const fn without(self, option: Self) -> Self {
        Self(self.0 & !option.0)
    }
}

/// Network parameters written to NV before start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// PAN id.
    pub pan_id: u16,
    /// Bit mask of allowed channels (bit n = channel n).
    pub channel_mask: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkConfig {
    /// Creates the default network parameters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pan_id: DEFAULT_PAN_ID,
            channel_mask: DEFAULT_CHANNEL_MASK,
        }
    }

    /// Sets the PAN id.
    #[must_use]
    pub const fn pan_id(mut self, pan_id: u16) -> Self {
        self.pan_id = pan_id;
        self
    }

    /// Sets the channel mask.
    #[must_use]
    pub const fn channel_mask(mut self, mask: u32) -> Self {
        self.channel_mask = mask;
        self
    }
}

/// Local application endpoint registered with the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint number (1-240).
    pub endpoint: u8,
    /// Application profile id.
    pub profile_id: u16,
    /// Application device id.
    pub device_id: u16,
    /// Application device version.
    pub device_version: u8,
    /// Server (input) clusters.
    pub in_clusters: Vec<u16>,
    /// Client (output) clusters.
    pub out_clusters: Vec<u16>,
}

impl EndpointDescriptor {
    /// Creates an endpoint with no clusters.
    #[must_use]
    pub const fn new(endpoint: u8, profile_id: u16, device_id: u16) -> Self {
        Self {
            endpoint,
            profile_id,
            device_id,
            device_version: 0,
            in_clusters: Vec::new(),
            out_clusters: Vec::new(),
        }
    }

    /// Default endpoint for a role.
    ///
    /// Coordinators and routers register a combined interface; end devices
    /// register an on/off switch with the on/off cluster as a client.
    #[must_use]
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Coordinator | DeviceRole::Router => {
                Self::new(1, PROFILE_HOME_AUTOMATION, 0x0007)
            }
            DeviceRole::EndDevice => {
                Self::new(1, PROFILE_HOME_AUTOMATION, 0x0000).out_clusters(vec![0x0006])
            }
        }
    }

    /// Sets the device version.
    #[must_use]
    pub const fn device_version(mut self, version: u8) -> Self {
        self.device_version = version;
        self
    }

    /// Sets the server clusters.
    #[must_use]
    pub fn in_clusters(mut self, clusters: Vec<u16>) -> Self {
        self.in_clusters = clusters;
        self
    }

    /// Sets the client clusters.
    #[must_use]
    pub fn out_clusters(mut self, clusters: Vec<u16>) -> Self {
        self.out_clusters = clusters;
        self
    }
}

/// Everything the driver needs to open, attach to and bring up a radio.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Serial port settings, used by [`crate::Driver::init`].
    pub serial: SerialConfig,
    /// Role the radio should run in.
    pub role: DeviceRole,
    /// Startup options for the clear-config pass.
    pub startup: StartupOptions,
    /// Network parameters.
    pub network: NetworkConfig,
    /// Explicit endpoint; `None` uses [`EndpointDescriptor::for_role`].
    pub endpoint: Option<EndpointDescriptor>,
    /// Byte order of multi-byte wire fields.
    pub byte_order: ByteOrder,
    /// Wait deadlines.
    pub timeouts: Timeouts,
}

impl DriverConfig {
    /// Creates a coordinator configuration for the given serial port.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            serial: SerialConfig::new(port),
            role: DeviceRole::Coordinator,
            startup: StartupOptions::NONE,
            network: NetworkConfig::new(),
            endpoint: None,
            byte_order: ByteOrder::Little,
            timeouts: Timeouts::new(),
        }
    }

    /// Replaces the serial settings.
    #[must_use]
    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Sets the role.
    #[must_use]
    pub const fn role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    /// Sets the startup options.
    #[must_use]
    pub const fn startup(mut self, startup: StartupOptions) -> Self {
        self.startup = startup;
        self
    }

    /// Sets the network parameters.
    #[must_use]
    pub const fn network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Sets an explicit endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: EndpointDescriptor) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the wire byte order.
    #[must_use]
    pub const fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Sets the timeouts.
    #[must_use]
    pub const fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Returns the endpoint to register.
    #[must_use]
    pub fn endpoint_descriptor(&self) -> EndpointDescriptor {
        self.endpoint
            .clone()
            .unwrap_or_else(|| EndpointDescriptor::for_role(self.role))
    }
}
