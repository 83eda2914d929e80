//! Host/wire byte-order policy.
//!
//! Every multi-byte field the driver puts on or takes off the wire goes
//! through [`ByteOrder`]. The radio's native order is little-endian; the
//! policy exists so that a module with the opposite order can be driven by
//! changing one configuration value instead of touching call sites.
//!
//! Frame command codes are not covered here: `CMD0 CMD1` is a pair of
//! bytes, not an integer, and always travels in that order.

use bytes::{Buf, BufMut};

/// Byte order of multi-byte fields inside frame payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Converts a host `u16` into wire bytes.
    #[must_use]
    pub const fn u16_to_wire(self, value: u16) -> [u8; 2] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    /// Converts wire bytes into a host `u16`.
    #[must_use]
    pub const fn u16_from_wire(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Converts a host `u32` into wire bytes.
    #[must_use]
    pub const fn u32_to_wire(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    /// Converts wire bytes into a host `u32`.
    #[must_use]
    pub const fn u32_from_wire(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Converts an IEEE address held most-significant-byte first into wire order.
    #[must_use]
    pub fn ieee_to_wire(self, canonical: [u8; 8]) -> [u8; 8] {
        let mut out = canonical;
        if self == Self::Little {
            out.reverse();
        }
        out
    }

    /// Converts an IEEE address from wire order into most-significant-byte-first order.
    #[must_use]
    pub fn ieee_from_wire(self, wire: [u8; 8]) -> [u8; 8] {
        // The operation is its own inverse.
        self.ieee_to_wire(wire)
    }

    /// Appends a `u16` in wire order.
    pub fn put_u16(self, buf: &mut impl BufMut, value: u16) {
        buf.put_slice(&self.u16_to_wire(value));
    }

    /// Appends a `u32` in wire order.
    pub fn put_u32(self, buf: &mut impl BufMut, value: u32) {
        buf.put_slice(&self.u32_to_wire(value));
    }

    /// Appends an IEEE address in wire order.
    pub fn put_ieee(self, buf: &mut impl BufMut, canonical: [u8; 8]) {
        buf.put_slice(&self.ieee_to_wire(canonical));
    }

    /// Reads a `u16` in wire order. The caller checks the remaining length.
    pub fn get_u16(self, buf: &mut impl Buf) -> u16 {
        let mut raw = [0u8; 2];
        buf.copy_to_slice(&mut raw);
        self.u16_from_wire(raw)
    }

    /// Reads a `u32` in wire order. The caller checks the remaining length.
    pub fn get_u32(self, buf: &mut impl Buf) -> u32 {
        let mut raw = [0u8; 4];
        buf.copy_to_slice(&mut raw);
        self.u32_from_wire(raw)
    }

    /// Reads an IEEE address in wire order. The caller checks the remaining length.
    pub fn get_ieee(self, buf: &mut impl Buf) -> [u8; 8] {
        let mut raw = [0u8; 8];
        buf.copy_to_slice(&mut raw);
        self.ieee_from_wire(raw)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn test_u16_orders() {
        assert_eq!(ByteOrder::Little.u16_to_wire(0x1234), [0x34, 0x12]);
        assert_eq!(ByteOrder::Big.u16_to_wire(0x1234), [0x12, 0x34]);
        assert_eq!(ByteOrder::Little.u16_from_wire([0x34, 0x12]), 0x1234);
    }

    #[test]
    fn test_u32_channel_mask() {
        assert_eq!(
            ByteOrder::Little.u32_to_wire(0x0010_0000),
            [0x00, 0x00, 0x10, 0x00]
        );
        assert_eq!(
            ByteOrder::Big.u32_from_wire([0x00, 0x10, 0x00, 0x00]),
            0x0010_0000
        );
    }

    #[test]
    fn test_ieee_reversed_on_little_endian_wire() {
        let canonical = [0x00, 0x12, 0x4B, 0x00, 0x01, 0x02, 0x03, 0x04];
        let wire = ByteOrder::Little.ieee_to_wire(canonical);
        assert_eq!(wire, [0x04, 0x03, 0x02, 0x01, 0x00, 0x4B, 0x12, 0x00]);
        assert_eq!(ByteOrder::Little.ieee_from_wire(wire), canonical);
        assert_eq!(ByteOrder::Big.ieee_to_wire(canonical), canonical);
    }

    #[test]
    fn test_put_and_get() {
        let mut buf = BytesMut::new();
        ByteOrder::Little.put_u16(&mut buf, 0xABCD);
        ByteOrder::Little.put_u32(&mut buf, 0x0102_0304);
        assert_eq!(&buf[..], &[0xCD, 0xAB, 0x04, 0x03, 0x02, 0x01]);

        let mut cursor = std::io::Cursor::new(&buf[..]);
        assert_eq!(ByteOrder::Little.get_u16(&mut cursor), 0xABCD);
        assert_eq!(ByteOrder::Little.get_u32(&mut cursor), 0x0102_0304);
    }
}
