//! Binary payload parsers for replies and notifications.
//!
//! Every parser checks the length up front, then walks the payload with a
//! cursor. Multi-byte fields go through the configured [`ByteOrder`].

use std::io::Cursor;

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use crate::protocol::wire::ByteOrder;
use crate::types::{
    Address, DataConfirm, DeviceAnnounce, DeviceInfoItem, DeviceInfoParam, Ieee, IncomingMessage,
    NetworkState, ResetInfo,
};

fn too_short(what: &str, need: usize, got: usize) -> Error {
    Error::Protocol {
        message: format!("{what} too short: need {need} bytes, got {got}"),
    }
}

/// Returns the status byte that leads most SRSP payloads.
pub fn parse_status(data: &[u8]) -> Result<u8> {
    data.first()
        .copied()
        .ok_or_else(|| too_short("status reply", 1, 0))
}

/// Fails with [`Error::DeviceStatus`] unless the leading status byte is zero.
pub fn expect_success(data: &[u8]) -> Result<()> {
    match parse_status(data)? {
        0 => Ok(()),
        status => Err(Error::DeviceStatus { status }),
    }
}

/// Parses an incoming application message.
///
/// Format:
/// ```text
/// [group:2] [cluster:2] [src_addr:2] [src_ep:1] [dst_ep:1] [was_bcast:1]
/// [lqi:1] [security:1] [timestamp:4] [trans_seq:1] [len:1] [data:len]
/// ```
pub fn parse_incoming_message(data: &Bytes, order: ByteOrder) -> Result<IncomingMessage> {
    const HEADER: usize = 17;
    if data.len() < HEADER {
        return Err(too_short("incoming message", HEADER, data.len()));
    }

    let mut cursor = Cursor::new(&data[..]);
    let group_id = order.get_u16(&mut cursor);
    let cluster_id = order.get_u16(&mut cursor);
    let src_addr = order.get_u16(&mut cursor);
    let src_endpoint = cursor.get_u8();
    let dst_endpoint = cursor.get_u8();
    let was_broadcast = cursor.get_u8() != 0;
    let link_quality = cursor.get_u8();
    let security_use = cursor.get_u8() != 0;
    let timestamp = order.get_u32(&mut cursor);
    let trans_seq = cursor.get_u8();
    let len = usize::from(cursor.get_u8());

    if data.len() < HEADER + len {
        return Err(too_short("incoming message data", HEADER + len, data.len()));
    }

    Ok(IncomingMessage {
        source: Address::Short(src_addr),
        profile_id: None,
        cluster_id,
        src_endpoint,
        dst_endpoint,
        group_id,
        was_broadcast,
        link_quality,
        security_use,
        timestamp,
        trans_seq,
        data: data.slice(HEADER..HEADER + len),
    })
}

/// Parses a data confirm.
///
/// Format: `[status:1] [endpoint:1] [trans_id:1]`
pub fn parse_data_confirm(data: &[u8]) -> Result<DataConfirm> {
    if data.len() < 3 {
        return Err(too_short("data confirm", 3, data.len()));
    }
    Ok(DataConfirm {
        status: data[0],
        endpoint: data[1],
        trans_id: data[2],
    })
}

/// Parses a reset indication.
///
/// Format: `[reason:1] [transport_rev:1] [product:1] [major:1] [minor:1] [hw_rev:1]`
pub fn parse_reset_info(data: &[u8]) -> Result<ResetInfo> {
    if data.len() < 6 {
        return Err(too_short("reset indication", 6, data.len()));
    }
    Ok(ResetInfo {
        reason: data[0],
        transport_rev: data[1],
        product_id: data[2],
        major: data[3],
        minor: data[4],
        hw_rev: data[5],
    })
}

/// Parses a state change indication.
pub fn parse_state_change(data: &[u8]) -> Result<NetworkState> {
    data.first()
        .map(|b| NetworkState::from_byte(*b))
        .ok_or_else(|| too_short("state change", 1, 0))
}

/// Parses an end device announcement.
///
/// Format: `[src_addr:2] [nwk_addr:2] [ieee:8] [capabilities:1]`
pub fn parse_device_announce(data: &[u8], order: ByteOrder) -> Result<DeviceAnnounce> {
    if data.len() < 13 {
        return Err(too_short("device announce", 13, data.len()));
    }
    let mut cursor = Cursor::new(data);
    let src_address = order.get_u16(&mut cursor);
    let network_address = order.get_u16(&mut cursor);
    let ieee = Ieee::new(order.get_ieee(&mut cursor));
    let capabilities = cursor.get_u8();
    Ok(DeviceAnnounce {
        src_address,
        network_address,
        ieee,
        capabilities,
    })
}

/// Parses an NV read reply into its value bytes.
///
/// Format: `[status:1] [len:1] [value:len]`
pub fn parse_nv_read(data: &Bytes) -> Result<Bytes> {
    expect_success(data)?;
    if data.len() < 2 {
        return Err(too_short("NV read reply", 2, data.len()));
    }
    let len = usize::from(data[1]);
    if data.len() < 2 + len {
        return Err(too_short("NV read value", 2 + len, data.len()));
    }
    Ok(data.slice(2..2 + len))
}

/// Parses one device-info reply.
///
/// Format: `[param:1] [value:8]`
pub fn parse_device_info_item(data: &[u8]) -> Result<DeviceInfoItem> {
    if data.len() < 9 {
        return Err(too_short("device info", 9, data.len()));
    }
    let param = DeviceInfoParam::from_byte(data[0]).ok_or_else(|| Error::Protocol {
        message: format!("unknown device info item {}", data[0]),
    })?;
    let mut value = [0u8; 8];
    value.copy_from_slice(&data[1..9]);
    Ok(DeviceInfoItem { param, value })
}
