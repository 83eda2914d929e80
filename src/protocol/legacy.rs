//! Legacy STX/ETX framing with interleaved AT text.
//!
//! Older radio firmware answers AT commands with whitespace-separated text
//! and wraps binary traffic in frames:
//! ```text
//! ┌──────┬──────────┬─────────┬──────────┬────────┬──────┬──────┐
//! │ 0x02 │ LEN (BE) │ CMDBYTE │   ADDR   │  BODY  │ CHK  │ 0x03 │
//! │  1   │    2     │    1    │ 0, 2, 8  │        │  1   │  1   │
//! └──────┴──────────┴─────────┴──────────┴────────┴──────┴──────┘
//! ```
//!
//! `LEN` counts `CMDBYTE`, `ADDR` and `BODY`. `CMDBYTE` holds the address
//! mode in its top two bits and the command type in the rest. `CHK` is
//! `0xFF` minus the byte sum of `LEN..BODY`, modulo 256.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::{FrameError, Result};
use crate::protocol::wire::ByteOrder;
use crate::transport::TransportBuffer;
use crate::types::{Address, Ieee, IncomingMessage};

/// Start of a binary frame.
pub const STX: u8 = 0x02;
/// End of a binary frame.
pub const ETX: u8 = 0x03;

/// Largest `LEN` value accepted.
pub const MAX_CONTENT_LEN: usize = 512;

/// Command type: AT command carried in binary form.
pub const CMD_AT: u8 = 0x01;
/// Command type: raw application data.
pub const CMD_RAW: u8 = 0x02;

/// Address mode in the top two bits of `CMDBYTE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressMode {
    /// No address bytes.
    Absent = 0,
    /// Two-byte group address.
    Group = 1,
    /// Two-byte short address.
    Short = 2,
    /// Eight-byte IEEE address.
    Extended = 3,
}

impl AddressMode {
    /// Parses the mode from a command byte.
    #[must_use]
    pub const fn from_cmd_byte(cmd: u8) -> Self {
        match cmd >> 6 {
            0 => Self::Absent,
            1 => Self::Group,
            2 => Self::Short,
            _ => Self::Extended,
        }
    }

    /// Number of address bytes that follow the command byte.
    #[must_use]
    pub const fn address_len(self) -> usize {
        match self {
            Self::Absent => 0,
            Self::Group | Self::Short => 2,
            Self::Extended => 8,
        }
    }
}

/// A decoded legacy frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFrame {
    /// Command type (low six bits of `CMDBYTE`).
    pub command_type: u8,
    /// Address mode.
    pub mode: AddressMode,
    /// Destination or source address.
    pub address: Address,
    /// Frame body.
    pub body: Bytes,
}

/// Decoded raw-data body of a [`CMD_RAW`] frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Sender endpoint.
    pub src_endpoint: u8,
    /// Receiver endpoint.
    pub dst_endpoint: u8,
    /// Profile id.
    pub profile_id: u16,
    /// Cluster id.
    pub cluster_id: u16,
    /// Application payload.
    pub data: Bytes,
}

/// One unit read from a legacy stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyItem {
    /// A validated binary frame.
    Frame(LegacyFrame),
    /// A whitespace-delimited word of AT response text.
    Word(String),
}

/// Additive checksum: `0xFF - sum(data) mod 256`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF_u8.wrapping_sub(sum)
}

impl LegacyFrame {
    /// Creates a frame, picking the address mode from `address`.
    #[must_use]
    pub fn new(command_type: u8, address: Address, body: impl Into<Bytes>) -> Self {
        let mode = match address {
            Address::Absent => AddressMode::Absent,
            Address::Short(_) => AddressMode::Short,
            Address::Extended(_) => AddressMode::Extended,
        };
        Self {
            command_type: command_type & 0x3F,
            mode,
            address,
            body: body.into(),
        }
    }

    /// Creates a group-addressed frame.
    #[must_use]
    pub fn group(command_type: u8, group: u16, body: impl Into<Bytes>) -> Self {
        Self {
            command_type: command_type & 0x3F,
            mode: AddressMode::Group,
            address: Address::Short(group),
            body: body.into(),
        }
    }

    /// Builds a [`CMD_RAW`] frame carrying application data.
    #[must_use]
    pub fn raw(address: Address, message: &RawMessage, order: ByteOrder) -> Self {
        let mut body = BytesMut::with_capacity(6 + message.data.len());
        body.put_u8(message.src_endpoint);
        body.put_u8(message.dst_endpoint);
        order.put_u16(&mut body, message.profile_id);
        order.put_u16(&mut body, message.cluster_id);
        body.put_slice(&message.data);
        Self::new(CMD_RAW, address, body.freeze())
    }

    /// Encodes the frame.
    pub fn encode(&self, order: ByteOrder) -> std::result::Result<Bytes, FrameError> {
        let content_len = 1 + self.mode.address_len() + self.body.len();
        if content_len > MAX_CONTENT_LEN {
            return Err(FrameError::TooLarge {
                size: content_len,
                max: MAX_CONTENT_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(content_len + 6);
        buf.put_u8(STX);
        buf.put_u16(content_len as u16);
        buf.put_u8(((self.mode as u8) << 6) | (self.command_type & 0x3F));
        match (self.mode, self.address) {
            (AddressMode::Absent, _) => {}
            (AddressMode::Extended, Address::Extended(ieee)) => {
                buf.put_slice(&ieee.to_bytes());
            }
            (AddressMode::Group | AddressMode::Short, Address::Short(addr)) => {
                order.put_u16(&mut buf, addr);
            }
            (mode, _) => {
                return Err(FrameError::UnknownAddressMode(mode as u8));
            }
        }
        buf.put_slice(&self.body);
        let chk = checksum(&buf[1..]);
        buf.put_u8(chk);
        buf.put_u8(ETX);
        Ok(buf.freeze())
    }

    /// Decodes one complete frame from `data`, starting at the STX byte.
    pub fn decode(data: &[u8], order: ByteOrder) -> std::result::Result<Self, FrameError> {
        if data.len() < 6 {
            return Err(FrameError::TooShort {
                min: 6,
                got: data.len(),
            });
        }
        if data[0] != STX {
            return Err(FrameError::BadStartMarker {
                expected: STX,
                found: data[0],
            });
        }
        let content_len = usize::from(u16::from_be_bytes([data[1], data[2]]));
        if content_len > MAX_CONTENT_LEN {
            return Err(FrameError::TooLarge {
                size: content_len,
                max: MAX_CONTENT_LEN,
            });
        }
        let expected = content_len + 5;
        if data.len() != expected {
            return Err(FrameError::Incomplete {
                expected,
                got: data.len(),
            });
        }
        Self::from_parts(&data[1..expected], order)
    }

    /// Validates `LEN..ETX` and builds the frame.
    fn from_parts(parts: &[u8], order: ByteOrder) -> std::result::Result<Self, FrameError> {
        let end = parts[parts.len() - 1];
        if end != ETX {
            return Err(FrameError::BadEndMarker {
                expected: ETX,
                found: end,
            });
        }
        let chk = parts[parts.len() - 2];
        let computed = checksum(&parts[..parts.len() - 2]);
        if chk != computed {
            return Err(FrameError::BadChecksum {
                expected: computed,
                got: chk,
            });
        }

        let content = &parts[2..parts.len() - 2];
        let Some(&cmd) = content.first() else {
            return Err(FrameError::TooShort { min: 1, got: 0 });
        };
        let mode = AddressMode::from_cmd_byte(cmd);
        let addr_len = mode.address_len();
        if content.len() < 1 + addr_len {
            return Err(FrameError::Incomplete {
                expected: 1 + addr_len,
                got: content.len(),
            });
        }
        let addr = &content[1..=addr_len];
        let address = match mode {
            AddressMode::Absent => Address::Absent,
            AddressMode::Group | AddressMode::Short => {
                Address::Short(order.u16_from_wire([addr[0], addr[1]]))
            }
            AddressMode::Extended => {
                Ieee::try_from_slice(addr).map_or(Address::Absent, Address::Extended)
            }
        };

        Ok(Self {
            command_type: cmd & 0x3F,
            mode,
            address,
            body: Bytes::copy_from_slice(&content[1 + addr_len..]),
        })
    }

    /// Decodes the body of a [`CMD_RAW`] frame.
    ///
    /// Format: `[src_ep:1] [dst_ep:1] [profile:2] [cluster:2] [data...]`
    #[must_use]
    pub fn raw_message(&self, order: ByteOrder) -> Option<RawMessage> {
        if self.command_type & CMD_RAW != CMD_RAW || self.body.len() < 6 {
            return None;
        }
        let b = &self.body;
        Some(RawMessage {
            src_endpoint: b[0],
            dst_endpoint: b[1],
            profile_id: order.u16_from_wire([b[2], b[3]]),
            cluster_id: order.u16_from_wire([b[4], b[5]]),
            data: self.body.slice(6..),
        })
    }

    /// Converts a raw-data frame into an [`IncomingMessage`] for dispatch.
    #[must_use]
    pub fn to_incoming(&self, order: ByteOrder) -> Option<IncomingMessage> {
        let raw = self.raw_message(order)?;
        Some(IncomingMessage {
            source: self.address,
            profile_id: Some(raw.profile_id),
            cluster_id: raw.cluster_id,
            src_endpoint: raw.src_endpoint,
            dst_endpoint: raw.dst_endpoint,
            group_id: if self.mode == AddressMode::Group {
                self.address.short().unwrap_or_default()
            } else {
                0
            },
            was_broadcast: false,
            link_quality: 0,
            security_use: false,
            timestamp: 0,
            trans_seq: 0,
            data: raw.data,
        })
    }
}

/// Reads the next word or frame from a legacy stream.
///
/// Text is split on ASCII whitespace. An STX byte starts a binary frame; a
/// frame that fails validation has every byte after its STX put back and
/// `Ok(None)` is returned, as is the case when no complete unit arrived in
/// time.
pub async fn read_legacy<R>(
    buffer: &mut TransportBuffer<R>,
    order: ByteOrder,
) -> Result<Option<LegacyItem>>
where
    R: AsyncRead + Unpin,
{
    let mut word = Vec::new();
    loop {
        let Some(byte) = buffer.read_byte().await? else {
            // Keep the partial word for the next call.
            buffer.put_back(&word);
            return Ok(None);
        };
        if byte == STX {
            if !word.is_empty() {
                buffer.put_back(&[STX]);
                return Ok(Some(LegacyItem::Word(String::from_utf8_lossy(&word).into_owned())));
            }
            return read_legacy_frame(buffer, order).await;
        }
        if byte.is_ascii_whitespace() {
            if !word.is_empty() {
                return Ok(Some(LegacyItem::Word(String::from_utf8_lossy(&word).into_owned())));
            }
        } else {
            word.push(byte);
        }
    }
}

async fn read_legacy_frame<R>(
    buffer: &mut TransportBuffer<R>,
    order: ByteOrder,
) -> Result<Option<LegacyItem>>
where
    R: AsyncRead + Unpin,
{
    let header = buffer.read_exact(2).await?;
    if header.len() != 2 {
        buffer.put_back(&header);
        return Ok(None);
    }
    let content_len = usize::from(u16::from_be_bytes([header[0], header[1]]));
    if content_len == 0 || content_len > MAX_CONTENT_LEN {
        tracing::debug!("legacy frame length {} out of range", content_len);
        buffer.put_back(&header);
        return Ok(None);
    }

    // content, CHK, ETX
    let rest = buffer.read_exact(content_len + 2).await?;
    let mut parts = BytesMut::with_capacity(2 + rest.len());
    parts.put_slice(&header);
    parts.put_slice(&rest);

    if rest.len() != content_len + 2 {
        tracing::debug!("short legacy frame: {} of {} bytes", rest.len(), content_len + 2);
        buffer.put_back(&parts);
        return Ok(None);
    }

    match LegacyFrame::from_parts(&parts, order) {
        Ok(frame) => Ok(Some(LegacyItem::Frame(frame))),
        Err(e) => {
            tracing::debug!("invalid legacy frame: {}; resyncing", e);
            buffer.put_back(&parts);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn buffer_over(bytes: &[u8]) -> TransportBuffer<tokio::io::DuplexStream> {
        let (device, host) = tokio::io::duplex(4096);
        let data = bytes.to_vec();
        tokio::spawn(async move {
            let mut device = device;
            device.write_all(&data).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        TransportBuffer::with_timeout(host, Duration::from_millis(50))
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0xFF);
        assert_eq!(checksum(&[0x00, 0x03, 0x02]), 0xFA);
        assert_eq!(checksum(&[0xFF, 0x02]), 0xFE);
    }

    #[test]
    fn test_encode_short_addressed() {
        let frame = LegacyFrame::new(CMD_RAW, Address::Short(0x1234), vec![0xAA]);
        let wire = frame.encode(ByteOrder::Big).unwrap();
        // LEN = cmd + 2 addr + 1 body
        assert_eq!(&wire[..6], &[STX, 0x00, 0x04, 0x82, 0x12, 0x34]);
        assert_eq!(wire[6], 0xAA);
        assert_eq!(wire[wire.len() - 1], ETX);
        assert_eq!(LegacyFrame::decode(&wire, ByteOrder::Big).unwrap(), frame);
    }

    #[test]
    fn test_extended_and_group_round_trip() {
        let ieee = Ieee::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let ext = LegacyFrame::new(CMD_AT, Address::Extended(ieee), b"atinfo".to_vec());
        let wire = ext.encode(ByteOrder::Big).unwrap();
        assert_eq!(wire[3] >> 6, AddressMode::Extended as u8);
        assert_eq!(LegacyFrame::decode(&wire, ByteOrder::Big).unwrap(), ext);

        let group = LegacyFrame::group(CMD_RAW, 0x0001, Bytes::new());
        let wire = group.encode(ByteOrder::Big).unwrap();
        assert_eq!(LegacyFrame::decode(&wire, ByteOrder::Big).unwrap(), group);
    }

    #[test]
    fn test_decode_rejects_bad_end_and_checksum() {
        let wire = LegacyFrame::new(CMD_AT, Address::Absent, b"at".to_vec())
            .encode(ByteOrder::Big)
            .unwrap()
            .to_vec();

        let mut bad_end = wire.clone();
        *bad_end.last_mut().unwrap() = 0x04;
        assert!(matches!(
            LegacyFrame::decode(&bad_end, ByteOrder::Big),
            Err(FrameError::BadEndMarker { .. })
        ));

        let mut bad_sum = wire;
        bad_sum[4] ^= 0x20;
        assert!(matches!(
            LegacyFrame::decode(&bad_sum, ByteOrder::Big),
            Err(FrameError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_raw_message_to_incoming() {
        let raw = RawMessage {
            src_endpoint: 0x0A,
            dst_endpoint: 0x01,
            profile_id: 0x0104,
            cluster_id: 0x0006,
            data: Bytes::from_static(&[0x18, 0x03, 0x0B, 0x01, 0x00]),
        };
        let frame = LegacyFrame::raw(Address::Short(0x2222), &raw, ByteOrder::Big);
        assert_eq!(frame.raw_message(ByteOrder::Big).unwrap(), raw);

        let msg = frame.to_incoming(ByteOrder::Big).unwrap();
        assert_eq!(msg.source, Address::Short(0x2222));
        assert_eq!(msg.profile_id, Some(0x0104));
        assert_eq!(msg.sequence(), Some(3));
    }

    #[tokio::test]
    async fn test_read_words_and_frame() {
        let frame = LegacyFrame::new(CMD_AT, Address::Absent, b"OK".to_vec());
        let mut stream = b"  +CREG 1\r\n".to_vec();
        stream.extend_from_slice(&frame.encode(ByteOrder::Big).unwrap());
        stream.extend_from_slice(b"OK\n");
        let mut buffer = buffer_over(&stream);

        let order = ByteOrder::Big;
        assert_eq!(
            read_legacy(&mut buffer, order).await.unwrap(),
            Some(LegacyItem::Word("+CREG".into()))
        );
        assert_eq!(
            read_legacy(&mut buffer, order).await.unwrap(),
            Some(LegacyItem::Word("1".into()))
        );
        assert_eq!(
            read_legacy(&mut buffer, order).await.unwrap(),
            Some(LegacyItem::Frame(frame))
        );
        assert_eq!(
            read_legacy(&mut buffer, order).await.unwrap(),
            Some(LegacyItem::Word("OK".into()))
        );
    }

    #[tokio::test]
    async fn test_corrupted_frame_resyncs() {
        let good = LegacyFrame::new(CMD_AT, Address::Absent, b"OK".to_vec());
        let mut bad = good.encode(ByteOrder::Big).unwrap().to_vec();
        let chk = bad.len() - 2;
        bad[chk] ^= 0x01;
        let mut stream = bad;
        stream.extend_from_slice(&good.encode(ByteOrder::Big).unwrap());
        let mut buffer = buffer_over(&stream);

        let mut items = Vec::new();
        for _ in 0..16 {
            if let Some(item) = read_legacy(&mut buffer, ByteOrder::Big).await.unwrap() {
                let done = matches!(item, LegacyItem::Frame(_));
                items.push(item);
                if done {
                    break;
                }
            }
        }
        assert_eq!(items.last(), Some(&LegacyItem::Frame(good)));
    }
}
