//! ZCL frame header.
//!
//! Only the header is interpreted; command payloads stay opaque.
//!
//! ```text
//! [control:1] [manufacturer:2LE, if control & 0x04] [sequence:1] [command:1] [payload...]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Frame control: command is cluster specific rather than profile wide.
pub const CLUSTER_SPECIFIC: u8 = 0x01;
/// Frame control: manufacturer code follows the control byte.
pub const MANUFACTURER_SPECIFIC: u8 = 0x04;
/// Frame control: sent from the server side of the cluster.
pub const SERVER_TO_CLIENT: u8 = 0x08;
/// Frame control: suppress the default response.
pub const DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

/// Profile-wide Default Response command id.
pub const DEFAULT_RESPONSE: u8 = 0x0B;

/// A ZCL frame: header fields plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    /// Frame control byte. The manufacturer bit is kept in sync with
    /// `manufacturer_code` when encoding.
    pub control: u8,
    /// Manufacturer code for manufacturer-specific commands.
    pub manufacturer_code: Option<u16>,
    /// Transaction sequence number.
    pub sequence: u8,
    /// Command id.
    pub command: u8,
    /// Command payload.
    pub payload: Bytes,
}

impl ZclFrame {
    /// Creates a frame without a manufacturer code.
    #[must_use]
    pub fn new(control: u8, sequence: u8, command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            control: control & !MANUFACTURER_SPECIFIC,
            manufacturer_code: None,
            sequence,
            command,
            payload: payload.into(),
        }
    }

    /// Sets a manufacturer code.
    #[must_use]
    pub const fn with_manufacturer(mut self, code: u16) -> Self {
        self.manufacturer_code = Some(code);
        self.control |= MANUFACTURER_SPECIFIC;
        self
    }

    /// Returns true for cluster-specific commands.
    #[must_use]
    pub const fn is_cluster_specific(&self) -> bool {
        self.control & CLUSTER_SPECIFIC != 0
    }

    /// Returns the status of a Default Response, if this is one.
    ///
    /// Payload layout: `[command:1] [status:1]`.
    #[must_use]
    pub fn default_response_status(&self) -> Option<u8> {
        if self.is_cluster_specific() || self.command != DEFAULT_RESPONSE {
            return None;
        }
        self.payload.get(1).copied()
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut control = self.control & !MANUFACTURER_SPECIFIC;
        if self.manufacturer_code.is_some() {
            control |= MANUFACTURER_SPECIFIC;
        }
        let mut buf = BytesMut::with_capacity(5 + self.payload.len());
        buf.put_u8(control);
        if let Some(code) = self.manufacturer_code {
            buf.put_u16_le(code);
        }
        buf.put_u8(self.sequence);
        buf.put_u8(self.command);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses a frame.
    pub fn parse(data: &Bytes) -> Result<Self> {
        let Some(&control) = data.first() else {
            return Err(Error::Protocol {
                message: "ZCL frame empty".into(),
            });
        };
        let header_len = if control & MANUFACTURER_SPECIFIC != 0 {
            5
        } else {
            3
        };
        if data.len() < header_len {
            return Err(Error::Protocol {
                message: format!("ZCL header too short: {} bytes", data.len()),
            });
        }

        let (manufacturer_code, rest) = if control & MANUFACTURER_SPECIFIC != 0 {
            (Some(u16::from_le_bytes([data[1], data[2]])), 3)
        } else {
            (None, 1)
        };

        Ok(Self {
            control,
            manufacturer_code,
            sequence: data[rest],
            command: data[rest + 1],
            payload: data.slice(rest + 2..),
        })
    }

    /// Reads just the sequence number, if the header is complete.
    #[must_use]
    pub fn peek_sequence(data: &[u8]) -> Option<u8> {
        let control = *data.first()?;
        let index = if control & MANUFACTURER_SPECIFIC != 0 {
            3
        } else {
            1
        };
        data.get(index).copied().filter(|_| data.len() > index + 1)
    }
}
