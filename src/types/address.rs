//! Zigbee addressing types.

use std::fmt;

/// Length of an IEEE (extended) address in bytes.
pub const IEEE_LEN: usize = 8;

/// Short address used for broadcasts to all devices.
pub const BROADCAST_ALL: u16 = 0xFFFF;

/// An 8-byte IEEE address, most significant byte first.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ieee([u8; IEEE_LEN]);

impl Ieee {
    /// Creates an address from bytes in most-significant-first order.
    #[must_use]
    pub const fn new(bytes: [u8; IEEE_LEN]) -> Self {
        Self(bytes)
    }

    /// Tries to create an address from a slice.
    ///
    /// Returns `None` if the slice is not exactly 8 bytes.
    #[must_use]
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; IEEE_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Returns the address bytes, most significant first.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; IEEE_LEN] {
        self.0
    }

    /// Returns the address as a hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses an address from a hex string, with or without `:` separators.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 16 digits.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(digits)?;
        Self::try_from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl fmt::Debug for Ieee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ieee({})", self.to_hex())
    }
}

impl fmt::Display for Ieee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; IEEE_LEN]> for Ieee {
    fn from(bytes: [u8; IEEE_LEN]) -> Self {
        Self(bytes)
    }
}

/// A node address.
///
/// Equality follows the variant: two absent addresses are equal, short
/// addresses compare by value, extended addresses by their bytes, and
/// addresses of different kinds are never equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Address {
    /// No address.
    #[default]
    Absent,
    /// 16-bit network address.
    Short(u16),
    /// 64-bit IEEE address.
    Extended(Ieee),
}

impl Address {
    /// Returns true if no address is set.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the short address, if this is one.
    #[must_use]
    pub const fn short(&self) -> Option<u16> {
        match self {
            Self::Short(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Returns the IEEE address, if this is one.
    #[must_use]
    pub const fn ieee(&self) -> Option<Ieee> {
        match self {
            Self::Extended(ieee) => Some(*ieee),
            _ => None,
        }
    }
}

impl From<u16> for Address {
    fn from(addr: u16) -> Self {
        Self::Short(addr)
    }
}

impl From<Ieee> for Address {
    fn from(ieee: Ieee) -> Self {
        Self::Extended(ieee)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("-"),
            Self::Short(addr) => write!(f, "0x{addr:04x}"),
            Self::Extended(ieee) => write!(f, "{ieee}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ieee_hex_round_trip() {
        let ieee = Ieee::from_hex("00:12:4b:00:01:02:03:04").unwrap();
        assert_eq!(ieee.to_bytes(), [0x00, 0x12, 0x4B, 0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(ieee.to_string(), "00124b0001020304");
        assert!(Ieee::from_hex("0012").is_err());
    }

    #[test]
    fn test_address_equality_is_type_aware() {
        assert_eq!(Address::Absent, Address::Absent);
        assert_eq!(Address::Short(0x1234), Address::Short(0x1234));
        assert_ne!(Address::Short(0x1234), Address::Short(0x1235));

        let ieee = Ieee::new([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Address::Extended(ieee), Address::Extended(ieee));
        assert_ne!(Address::Extended(ieee), Address::Short(0x0102));
        assert_ne!(Address::Absent, Address::Short(0));
    }

    #[test]
    fn test_address_accessors() {
        let addr = Address::from(0xABCD);
        assert_eq!(addr.short(), Some(0xABCD));
        assert_eq!(addr.ieee(), None);
        assert!(Address::Absent.is_absent());
        assert_eq!(addr.to_string(), "0xabcd");
    }
}
