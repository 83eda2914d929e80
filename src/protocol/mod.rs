//! Wire protocol for Zigbee network processors.
//!
//! This module contains the low-level protocol types including:
//! - MT frame encoding/decoding and the legacy STX/ETX framing
//! - Command codes and NV item ids
//! - Byte-order conversion at the codec boundary
//! - Payload parsing and the ZCL frame header

pub mod command;
pub mod frame;
pub mod legacy;
pub mod parser;
pub mod wire;
pub mod zcl;

pub use command::{CommandCode, CommandType, Subsystem, codes, nv};
pub use frame::{Frame, MAX_PAYLOAD_LEN, SOF, encode as encode_frame, read_frame};
pub use legacy::{AddressMode, LegacyFrame, LegacyItem, RawMessage, read_legacy};
pub use wire::ByteOrder;
pub use zcl::ZclFrame;
