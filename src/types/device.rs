//! Device identity and network state types.

use crate::protocol::wire::ByteOrder;
use crate::types::address::Ieee;

/// Logical role of the local radio in the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceRole {
    /// Forms and manages the network.
    #[default]
    Coordinator = 0,
    /// Joins and routes.
    Router = 1,
    /// Joins as a leaf.
    EndDevice = 2,
}

impl DeviceRole {
    /// Parses a role from its NV logical-type byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Coordinator),
            1 => Some(Self::Router),
            2 => Some(Self::EndDevice),
            _ => None,
        }
    }

    /// Network state the radio reports once it runs in this role.
    #[must_use]
    pub const fn target_state(self) -> NetworkState {
        match self {
            Self::Coordinator => NetworkState::Coordinator,
            Self::Router => NetworkState::Router,
            Self::EndDevice => NetworkState::EndDevice,
        }
    }
}

impl From<DeviceRole> for u8 {
    fn from(role: DeviceRole) -> Self {
        role as Self
    }
}

/// Network state reported by the radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NetworkState {
    /// Initialized, not started automatically.
    #[default]
    Hold,
    /// Initialized, not connected to anything.
    Init,
    /// Discovering networks to join.
    NwkDiscovery,
    /// Joining a network.
    NwkJoining,
    /// Rejoining a network.
    NwkRejoin,
    /// Joined but not yet authenticated.
    EndDeviceUnauth,
    /// Started as an end device.
    EndDevice,
    /// Started as a router.
    Router,
    /// Starting as a coordinator.
    CoordStarting,
    /// Started as a coordinator.
    Coordinator,
    /// Lost information about the parent.
    NwkOrphan,
    /// A state value this library does not know.
    Unknown(u8),
}

impl NetworkState {
    /// Parses a state byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Hold,
            1 => Self::Init,
            2 => Self::NwkDiscovery,
            3 => Self::NwkJoining,
            4 => Self::NwkRejoin,
            5 => Self::EndDeviceUnauth,
            6 => Self::EndDevice,
            7 => Self::Router,
            8 => Self::CoordStarting,
            9 => Self::Coordinator,
            10 => Self::NwkOrphan,
            other => Self::Unknown(other),
        }
    }

    /// Returns the state byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Hold => 0,
            Self::Init => 1,
            Self::NwkDiscovery => 2,
            Self::NwkJoining => 3,
            Self::NwkRejoin => 4,
            Self::EndDeviceUnauth => 5,
            Self::EndDevice => 6,
            Self::Router => 7,
            Self::CoordStarting => 8,
            Self::Coordinator => 9,
            Self::NwkOrphan => 10,
            Self::Unknown(other) => other,
        }
    }
}

/// Reset indication contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInfo {
    /// Reset reason (0 power-up, 1 external, 2 watchdog).
    pub reason: u8,
    /// Transport protocol revision.
    pub transport_rev: u8,
    /// Product id.
    pub product_id: u8,
    /// Firmware major version.
    pub major: u8,
    /// Firmware minor version.
    pub minor: u8,
    /// Hardware revision.
    pub hw_rev: u8,
}

/// Items of the device-info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceInfoParam {
    /// Network state.
    State = 0,
    /// Own IEEE address.
    IeeeAddress = 1,
    /// Own short address.
    ShortAddress = 2,
    /// Parent short address.
    ParentShortAddress = 3,
    /// Parent IEEE address.
    ParentIeeeAddress = 4,
    /// Operating channel.
    Channel = 5,
    /// PAN id.
    PanId = 6,
    /// Extended PAN id.
    ExtendedPanId = 7,
}

impl DeviceInfoParam {
    /// All items in query order.
    pub const ALL: [Self; 8] = [
        Self::State,
        Self::IeeeAddress,
        Self::ShortAddress,
        Self::ParentShortAddress,
        Self::ParentIeeeAddress,
        Self::Channel,
        Self::PanId,
        Self::ExtendedPanId,
    ];

    /// Parses an item tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::State),
            1 => Some(Self::IeeeAddress),
            2 => Some(Self::ShortAddress),
            3 => Some(Self::ParentShortAddress),
            4 => Some(Self::ParentIeeeAddress),
            5 => Some(Self::Channel),
            6 => Some(Self::PanId),
            7 => Some(Self::ExtendedPanId),
            _ => None,
        }
    }
}

impl From<DeviceInfoParam> for u8 {
    fn from(param: DeviceInfoParam) -> Self {
        param as Self
    }
}

/// One answered device-info item: tag plus its raw 8-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfoItem {
    /// Which item this is.
    pub param: DeviceInfoParam,
    /// Value bytes in wire order; unused trailing bytes are zero.
    pub value: [u8; 8],
}

/// Identity of the local radio, filled in during bring-up.
///
/// After bring-up the driver keeps `state` current from state-change
/// notifications; every other field stays as bring-up left it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Network state.
    pub state: NetworkState,
    /// Own short address.
    pub short_address: u16,
    /// Own IEEE address.
    pub ieee: Ieee,
    /// Parent short address.
    pub parent_short_address: u16,
    /// Parent IEEE address.
    pub parent_ieee: Ieee,
    /// Operating channel.
    pub channel: u8,
    /// PAN id.
    pub pan_id: u16,
    /// Extended PAN id.
    pub extended_pan_id: Ieee,
    /// Configured role.
    pub role: DeviceRole,
    /// Whether network security is enabled.
    pub security: bool,
}

impl DeviceState {
    /// Stores one device-info item, normalizing its byte order.
    pub fn apply(&mut self, item: &DeviceInfoItem, order: ByteOrder) {
        let value = item.value;
        let short = order.u16_from_wire([value[0], value[1]]);
        let ieee = Ieee::new(order.ieee_from_wire(value));
        match item.param {
            DeviceInfoParam::State => self.state = NetworkState::from_byte(value[0]),
            DeviceInfoParam::IeeeAddress => self.ieee = ieee,
            DeviceInfoParam::ShortAddress => self.short_address = short,
            DeviceInfoParam::ParentShortAddress => self.parent_short_address = short,
            DeviceInfoParam::ParentIeeeAddress => self.parent_ieee = ieee,
            DeviceInfoParam::Channel => self.channel = value[0],
            DeviceInfoParam::PanId => self.pan_id = short,
            DeviceInfoParam::ExtendedPanId => self.extended_pan_id = ieee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_targets() {
        assert_eq!(DeviceRole::Coordinator.target_state().to_byte(), 9);
        assert_eq!(DeviceRole::Router.target_state().to_byte(), 7);
        assert_eq!(DeviceRole::EndDevice.target_state().to_byte(), 6);
        assert_eq!(DeviceRole::from_byte(3), None);
    }

    #[test]
    fn test_network_state_round_trip_unknown() {
        assert_eq!(NetworkState::from_byte(0x42), NetworkState::Unknown(0x42));
        assert_eq!(NetworkState::Unknown(0x42).to_byte(), 0x42);
        assert_eq!(NetworkState::from_byte(9), NetworkState::Coordinator);
    }

    #[test]
    fn test_apply_items() {
        let mut state = DeviceState::default();
        let order = ByteOrder::Little;

        state.apply(
            &DeviceInfoItem {
                param: DeviceInfoParam::ShortAddress,
                value: [0x34, 0x12, 0, 0, 0, 0, 0, 0],
            },
            order,
        );
        state.apply(
            &DeviceInfoItem {
                param: DeviceInfoParam::IeeeAddress,
                value: [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01],
            },
            order,
        );
        state.apply(
            &DeviceInfoItem {
                param: DeviceInfoParam::Channel,
                value: [20, 0, 0, 0, 0, 0, 0, 0],
            },
            order,
        );

        assert_eq!(state.short_address, 0x1234);
        assert_eq!(state.ieee.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(state.channel, 20);
    }
}
