//! Binary frame encoding and decoding.
//!
//! The wire format:
//! ```text
//! ┌──────┬───────┬──────┬──────┬───────────────┬──────┐
//! │ 0xFE │  LEN  │ CMD0 │ CMD1 │    payload    │ FCS  │
//! │  1   │   1   │  1   │  1   │   LEN bytes   │  1   │
//! └──────┴───────┴──────┴──────┴───────────────┴──────┘
//! ```
//!
//! `FCS` is the XOR of every byte from `LEN` to the end of the payload.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::{FrameError, Result};
use crate::protocol::command::CommandCode;
use crate::transport::TransportBuffer;

/// Start-of-frame marker.
pub const SOF: u8 = 0xFE;

/// Largest payload the radio accepts in one frame.
pub const MAX_PAYLOAD_LEN: usize = 250;

/// Bytes around the payload: SOF, LEN, CMD0, CMD1, FCS.
pub const FRAME_OVERHEAD: usize = 5;

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub code: CommandCode,
    /// Payload bytes following the command code.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(code: CommandCode, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Encodes this frame for the wire.
    pub fn encode(&self) -> std::result::Result<Bytes, FrameError> {
        encode(self.code, &self.payload)
    }
}

/// XOR checksum over `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Encodes a command and payload into a wire frame.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode(code: CommandCode, payload: &[u8]) -> std::result::Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.put_u8(SOF);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(&code.to_wire());
    buf.put_slice(payload);
    let fcs = checksum(&buf[1..]);
    buf.put_u8(fcs);
    Ok(buf.freeze())
}

/// Decodes one complete frame from `data`.
///
/// `data` must hold exactly one frame starting at the SOF byte.
pub fn decode(data: &[u8]) -> std::result::Result<Frame, FrameError> {
    if data.len() < FRAME_OVERHEAD {
        return Err(FrameError::TooShort {
            min: FRAME_OVERHEAD,
            got: data.len(),
        });
    }
    if data[0] != SOF {
        return Err(FrameError::BadStartMarker {
            expected: SOF,
            found: data[0],
        });
    }

    let len = usize::from(data[1]);
    let expected = FRAME_OVERHEAD + len;
    if data.len() != expected {
        return Err(FrameError::Incomplete {
            expected,
            got: data.len(),
        });
    }

    let fcs = data[expected - 1];
    let computed = checksum(&data[1..expected - 1]);
    if fcs != computed {
        return Err(FrameError::BadChecksum {
            expected: computed,
            got: fcs,
        });
    }

    Ok(Frame {
        code: CommandCode::from_wire([data[2], data[3]]),
        payload: Bytes::copy_from_slice(&data[4..expected - 1]),
    })
}

/// Reads the next valid frame from the transport.
///
/// Scans forward to the next SOF byte, reads the header and body, and checks
/// the trailer. On a short read or checksum mismatch every byte consumed
/// after the SOF is put back, so the next call rescans them; the SOF itself
/// is dropped. Returns `Ok(None)` when no frame is available yet. Only
/// transport failures are errors.
pub async fn read_frame<R>(buffer: &mut TransportBuffer<R>) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match buffer.read_byte().await? {
            None => return Ok(None),
            Some(SOF) => break,
            Some(other) => tracing::trace!("skipping 0x{:02x} outside frame", other),
        }
    }

    let Some(len) = buffer.read_byte().await? else {
        return Ok(None);
    };

    // CMD0, CMD1, payload, FCS
    let want = usize::from(len) + 3;
    let body = buffer.read_exact(want).await?;
    if body.len() != want {
        tracing::debug!(
            "short frame: wanted {} bytes after length, got {}",
            want,
            body.len()
        );
        put_back_after_sof(buffer, len, &body);
        return Ok(None);
    }

    let fcs = body[want - 1];
    let computed = len ^ checksum(&body[..want - 1]);
    if fcs != computed {
        tracing::debug!(
            "checksum mismatch: expected 0x{:02x}, got 0x{:02x}; resyncing",
            computed,
            fcs
        );
        put_back_after_sof(buffer, len, &body);
        return Ok(None);
    }

    Ok(Some(Frame {
        code: CommandCode::from_wire([body[0], body[1]]),
        payload: body.slice(2..want - 1),
    }))
}

fn put_back_after_sof<R>(buffer: &mut TransportBuffer<R>, len: u8, body: &[u8])
where
    R: AsyncRead + Unpin,
{
    let mut consumed = Vec::with_capacity(1 + body.len());
    consumed.push(len);
    consumed.extend_from_slice(body);
    buffer.put_back(&consumed);
}
