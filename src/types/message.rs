//! Application-level message types.

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::zcl::ZclFrame;
use crate::types::address::{Address, Ieee};

/// An application message received from another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Sender address.
    pub source: Address,
    /// Profile id, when known for the destination endpoint.
    pub profile_id: Option<u16>,
    /// Cluster id.
    pub cluster_id: u16,
    /// Sender endpoint.
    pub src_endpoint: u8,
    /// Local endpoint the message was addressed to.
    pub dst_endpoint: u8,
    /// Group id for group-addressed messages, 0 otherwise.
    pub group_id: u16,
    /// True if the message was broadcast.
    pub was_broadcast: bool,
    /// Link quality of the received frame.
    pub link_quality: u8,
    /// True if APS security was applied.
    pub security_use: bool,
    /// Radio timestamp.
    pub timestamp: u32,
    /// APS transaction sequence number.
    pub trans_seq: u8,
    /// Application payload (a ZCL frame for ZCL profiles).
    pub data: Bytes,
}

impl IncomingMessage {
    /// Returns the ZCL sequence number carried in the payload, if any.
    #[must_use]
    pub fn sequence(&self) -> Option<u8> {
        ZclFrame::peek_sequence(&self.data)
    }

    /// Parses the payload as a ZCL frame.
    pub fn zcl(&self) -> Result<ZclFrame> {
        ZclFrame::parse(&self.data)
    }
}

/// Delivery confirmation for an outgoing data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfirm {
    /// Delivery status, 0 on success.
    pub status: u8,
    /// Source endpoint of the confirmed request.
    pub endpoint: u8,
    /// Transaction id of the confirmed request.
    pub trans_id: u8,
}

/// A node announcing itself after joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAnnounce {
    /// Address the announcement came from.
    pub src_address: u16,
    /// Network address of the new node.
    pub network_address: u16,
    /// IEEE address of the new node.
    pub ieee: Ieee,
    /// MAC capability flags.
    pub capabilities: u8,
}

impl DeviceAnnounce {
    /// Returns true if the node keeps its receiver on while idle.
    #[must_use]
    pub const fn receiver_on_when_idle(&self) -> bool {
        self.capabilities & 0x08 != 0
    }
}
