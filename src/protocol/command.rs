//! Command codes for the network processor protocol.
//!
//! Every frame carries a two-byte command code `CMD0 CMD1`. The top three
//! bits of `CMD0` give the [`CommandType`], the low five bits the
//! [`Subsystem`], and `CMD1` the command id within that subsystem.
//!
//! ```text
//!          CMD0                 CMD1
//! ┌──────────┬──────────────┬───────────┐
//! │ type:3   │ subsystem:5  │  id:8     │
//! └──────────┴──────────────┴───────────┘
//! ```

use std::fmt;

/// Command type carried in the top three bits of `CMD0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// Host poll for queued data.
    Poll = 0,
    /// Synchronous request, answered by exactly one SRSP.
    SyncRequest = 1,
    /// Asynchronous request or notification (AREQ).
    AsyncRequest = 2,
    /// Synchronous response (SRSP).
    SyncResponse = 3,
}

impl CommandType {
    /// Parses a command type from the top bits of `CMD0`.
    #[must_use]
    pub const fn from_cmd0(cmd0: u8) -> Option<Self> {
        match cmd0 >> 5 {
            0 => Some(Self::Poll),
            1 => Some(Self::SyncRequest),
            2 => Some(Self::AsyncRequest),
            3 => Some(Self::SyncResponse),
            _ => None,
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        value as Self
    }
}

/// Subsystem carried in the low five bits of `CMD0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Subsystem {
    /// Interface error reporting.
    RpcError = 0x00,
    /// System interface (reset, NV access, version).
    Sys = 0x01,
    /// MAC layer.
    Mac = 0x02,
    /// Network layer.
    Nwk = 0x03,
    /// Application framework.
    Af = 0x04,
    /// Zigbee device object.
    Zdo = 0x05,
    /// Simple API.
    Sapi = 0x06,
    /// Utilities.
    Util = 0x07,
    /// Application interface.
    App = 0x09,
}

impl Subsystem {
    /// Parses a subsystem from the low bits of `CMD0`.
    #[must_use]
    pub const fn from_cmd0(cmd0: u8) -> Option<Self> {
        match cmd0 & 0x1F {
            0x00 => Some(Self::RpcError),
            0x01 => Some(Self::Sys),
            0x02 => Some(Self::Mac),
            0x03 => Some(Self::Nwk),
            0x04 => Some(Self::Af),
            0x05 => Some(Self::Zdo),
            0x06 => Some(Self::Sapi),
            0x07 => Some(Self::Util),
            0x09 => Some(Self::App),
            _ => None,
        }
    }
}

impl From<Subsystem> for u8 {
    fn from(value: Subsystem) -> Self {
        value as Self
    }
}

/// A two-byte command code, `CMD0` in the high byte and `CMD1` in the low byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandCode(u16);

impl CommandCode {
    /// Builds a command code from its two wire bytes.
    #[must_use]
    pub const fn new(cmd0: u8, cmd1: u8) -> Self {
        Self(((cmd0 as u16) << 8) | cmd1 as u16)
    }

    /// Builds a command code from type, subsystem and id.
    #[must_use]
    pub const fn compose(kind: CommandType, subsystem: Subsystem, id: u8) -> Self {
        Self::new(((kind as u8) << 5) | subsystem as u8, id)
    }

    /// Returns `CMD0`.
    #[must_use]
    pub const fn cmd0(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Returns `CMD1`.
    #[must_use]
    pub const fn cmd1(self) -> u8 {
        self.0 as u8
    }

    /// Returns the command type, if the type bits are valid.
    #[must_use]
    pub const fn command_type(self) -> Option<CommandType> {
        CommandType::from_cmd0(self.cmd0())
    }

    /// Returns the subsystem, if known.
    #[must_use]
    pub const fn subsystem(self) -> Option<Subsystem> {
        Subsystem::from_cmd0(self.cmd0())
    }

    /// Returns the SRSP code that answers this request.
    #[must_use]
    pub const fn sync_reply(self) -> Self {
        Self::new((self.cmd0() & 0x1F) | 0x60, self.cmd1())
    }

    /// Returns the two bytes as they appear on the wire.
    #[must_use]
    pub const fn to_wire(self) -> [u8; 2] {
        [self.cmd0(), self.cmd1()]
    }

    /// Parses the two wire bytes.
    #[must_use]
    pub const fn from_wire(bytes: [u8; 2]) -> Self {
        Self::new(bytes[0], bytes[1])
    }

    /// Returns the raw 16-bit value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandCode({:02X} {:02X})", self.cmd0(), self.cmd1())
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Well-known command codes.
pub mod codes {
    use super::CommandCode;

    /// Resets the radio (AREQ, answered by [`SYS_RESET_IND`]).
    pub const SYS_RESET_REQ: CommandCode = CommandCode::new(0x41, 0x00);
    /// Reset indication carrying the reset reason and firmware version.
    pub const SYS_RESET_IND: CommandCode = CommandCode::new(0x41, 0x80);
    /// Liveness check.
    pub const SYS_PING: CommandCode = CommandCode::new(0x21, 0x01);
    /// Firmware version query.
    pub const SYS_VERSION: CommandCode = CommandCode::new(0x21, 0x02);
    /// Reads an NV item.
    pub const SYS_OSAL_NV_READ: CommandCode = CommandCode::new(0x21, 0x08);
    /// Writes an NV item.
    pub const SYS_OSAL_NV_WRITE: CommandCode = CommandCode::new(0x21, 0x09);

    /// Registers an application endpoint.
    pub const AF_REGISTER: CommandCode = CommandCode::new(0x24, 0x00);
    /// Sends data to a short address.
    pub const AF_DATA_REQUEST: CommandCode = CommandCode::new(0x24, 0x01);
    /// Sends data with extended addressing.
    pub const AF_DATA_REQUEST_EXT: CommandCode = CommandCode::new(0x24, 0x02);
    /// Delivery confirmation for a data request.
    pub const AF_DATA_CONFIRM: CommandCode = CommandCode::new(0x44, 0x80);
    /// Incoming application message.
    pub const AF_INCOMING_MSG: CommandCode = CommandCode::new(0x44, 0x81);

    /// Requests a node's simple descriptor.
    pub const ZDO_SIMPLE_DESC_REQ: CommandCode = CommandCode::new(0x25, 0x04);
    /// Requests a node's active endpoints.
    pub const ZDO_ACTIVE_EP_REQ: CommandCode = CommandCode::new(0x25, 0x05);
    /// Scans for networks.
    pub const ZDO_NWK_DISCOVERY_REQ: CommandCode = CommandCode::new(0x25, 0x26);
    /// Starts the network stack.
    pub const ZDO_STARTUP_FROM_APP: CommandCode = CommandCode::new(0x25, 0x40);
    /// Device state change notification.
    pub const ZDO_STATE_CHANGE_IND: CommandCode = CommandCode::new(0x45, 0xC0);
    /// End device announcement notification.
    pub const ZDO_END_DEVICE_ANNCE_IND: CommandCode = CommandCode::new(0x45, 0xC1);

    /// Reads one device information item.
    pub const ZB_GET_DEVICE_INFO: CommandCode = CommandCode::new(0x26, 0x06);

    /// SRSP sent when the radio rejects a command it cannot parse.
    pub const RPC_ERROR: CommandCode = CommandCode::new(0x60, 0x00);
}

/// NV item identifiers used during bring-up.
pub mod nv {
    /// Startup option flags.
    pub const STARTUP_OPTION: u16 = 0x0003;
    /// Security mode flag.
    pub const SECURITY_MODE: u16 = 0x0064;
    /// PAN id to form or join.
    pub const PAN_ID: u16 = 0x0083;
    /// Channel mask.
    pub const CHANNEL_LIST: u16 = 0x0084;
    /// Logical device type.
    pub const LOGICAL_TYPE: u16 = 0x0087;
    /// Route ZDO responses to the host as callbacks.
    pub const ZDO_DIRECT_CB: u16 = 0x008F;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_matches_constants() {
        let code = CommandCode::compose(CommandType::SyncRequest, Subsystem::Sys, 0x08);
        assert_eq!(code, codes::SYS_OSAL_NV_READ);
        assert_eq!(code.command_type(), Some(CommandType::SyncRequest));
        assert_eq!(code.subsystem(), Some(Subsystem::Sys));
    }

    #[test]
    fn test_sync_reply_code() {
        assert_eq!(codes::AF_REGISTER.sync_reply(), CommandCode::new(0x64, 0x00));
        assert_eq!(
            codes::ZB_GET_DEVICE_INFO.sync_reply().command_type(),
            Some(CommandType::SyncResponse)
        );
    }

    #[test]
    fn test_notification_types() {
        assert_eq!(
            codes::AF_INCOMING_MSG.command_type(),
            Some(CommandType::AsyncRequest)
        );
        assert_eq!(
            codes::SYS_RESET_REQ.command_type(),
            Some(CommandType::AsyncRequest)
        );
        assert_eq!(codes::RPC_ERROR.command_type(), Some(CommandType::SyncResponse));
    }

    #[test]
    fn test_wire_bytes_keep_cmd0_first() {
        assert_eq!(codes::ZDO_STATE_CHANGE_IND.to_wire(), [0x45, 0xC0]);
        assert_eq!(
            CommandCode::from_wire([0x45, 0xC0]),
            codes::ZDO_STATE_CHANGE_IND
        );
        assert_eq!(codes::ZDO_STATE_CHANGE_IND.to_string(), "45C0");
    }

    #[test]
    fn test_invalid_type_bits() {
        assert_eq!(CommandType::from_cmd0(0xE1), None);
        assert_eq!(Subsystem::from_cmd0(0x3F), None);
    }
}
