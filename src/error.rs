//! Error types for the zigbee-host library.

use thiserror::Error;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O failure on the underlying byte stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No reply arrived within the caller's deadline.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The radio answered with a non-zero status byte.
    #[error("device returned error status 0x{status:02x}")]
    DeviceStatus { status: u8 },

    /// A reply was well-formed on the wire but not what the command expects.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// An address cannot be used for the requested operation.
    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// A correlator payload had a different type than the caller asked for.
    #[error("unexpected payload type")]
    UnexpectedPayload,

    /// The driver was shut down while the operation was pending.
    #[error("driver shut down")]
    ShutDown,

    /// The reader task stopped after a fatal transport failure.
    #[error("reader stopped: {reason}")]
    ReaderStopped { reason: String },
}

impl Error {
    /// Builds a timeout error from a duration.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the device status code if the radio reported one.
    #[must_use]
    pub const fn device_status(&self) -> Option<u8> {
        match self {
            Self::DeviceStatus { status } => Some(*status),
            _ => None,
        }
    }
}

/// Frame-specific errors.
///
/// These never reach callers of the driver API: the reader treats any of
/// them as "no frame yet" and rescans.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short to contain its fixed header.
    #[error("frame too short: need at least {min} bytes, got {got}")]
    TooShort { min: usize, got: usize },

    /// Frame payload exceeds maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Incomplete frame data.
    #[error("incomplete frame: expected {expected} bytes, got {got}")]
    Incomplete { expected: usize, got: usize },

    /// Frame does not start with the expected marker byte.
    #[error("missing start marker 0x{expected:02x}, found 0x{found:02x}")]
    BadStartMarker { expected: u8, found: u8 },

    /// Trailing end marker missing (legacy framing).
    #[error("missing end marker 0x{expected:02x}, found 0x{found:02x}")]
    BadEndMarker { expected: u8, found: u8 },

    /// Checksum byte does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    BadChecksum { expected: u8, got: u8 },

    /// Address mode bits name no known addressing scheme.
    #[error("unknown address mode {0}")]
    UnknownAddressMode(u8),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
