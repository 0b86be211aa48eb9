//! Device addresses.
//!
//! An Insteon address is three bytes, written as dotted hex (`12.5F.5E`).
//! A [`DeviceRef`] adds an optional button/group suffix (`12.5F.5E:2`).
//! Equality is always exact on the three address bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InsteonError;

/// A 3-byte Insteon device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 3]);

impl Address {
    /// Create an address from its three bytes.
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    /// Read an address from the first three bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c, ..] => Some(Self([*a, *b, *c])),
            _ => None,
        }
    }

    /// The raw bytes.
    #[inline]
    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }

    /// The last byte, which carries the group number in group broadcasts.
    #[inline]
    pub fn low(&self) -> u8 {
        self.0[2]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}.{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Address {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InsteonError::InvalidAddress(s.to_string());
        let mut out = [0u8; 3];
        let mut parts = s.trim().split('.');
        for slot in out.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(out))
    }
}

impl TryFrom<String> for Address {
    type Error = InsteonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl From<[u8; 3]> for Address {
    fn from(value: [u8; 3]) -> Self {
        Self(value)
    }
}

/// An address with an optional button (keypad) or group number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub address: Address,
    pub button: Option<u8>,
}

impl DeviceRef {
    pub fn new(address: Address, button: Option<u8>) -> Self {
        Self { address, button }
    }

    /// Split `text` into its address part and an optional `:button` suffix.
    pub(crate) fn split_button(text: &str) -> Result<(&str, Option<u8>), InsteonError> {
        match text.split_once(':') {
            Some((head, btn)) => {
                let button = btn.trim().parse::<u8>().map_err(|_| {
                    InsteonError::InvalidParameter(format!("Invalid button number: {}", btn))
                })?;
                Ok((head, Some(button)))
            }
            None => Ok((text, None)),
        }
    }
}

impl From<Address> for DeviceRef {
    fn from(address: Address) -> Self {
        Self::new(address, None)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.button {
            Some(b) => write!(f, "{}:{}", self.address, b),
            None => write!(f, "{}", self.address),
        }
    }
}

impl FromStr for DeviceRef {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, button) = Self::split_button(s)?;
        Ok(Self::new(head.parse()?, button))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_hex() {
        let addr: Address = "12.5F.5E".parse().unwrap();
        assert_eq!(addr.bytes(), [0x12, 0x5F, 0x5E]);
        assert_eq!(addr.to_string(), "12.5F.5E");
    }

    #[test]
    fn test_parse_lowercase_and_short_parts() {
        let addr: Address = "a.5f.0".parse().unwrap();
        assert_eq!(addr, Address::new(0x0A, 0x5F, 0x00));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "12.5F", "12.5F.5E.01", "12.5G.5E", "123.5F.5E", "12..5E"] {
            assert!(
                matches!(bad.parse::<Address>(), Err(InsteonError::InvalidAddress(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_device_ref_with_button() {
        let r: DeviceRef = "42.22.B8:3".parse().unwrap();
        assert_eq!(r.address, Address::new(0x42, 0x22, 0xB8));
        assert_eq!(r.button, Some(3));
        assert_eq!(r.to_string(), "42.22.B8:3");
    }

    #[test]
    fn test_device_ref_bad_button() {
        assert!(matches!(
            "42.22.B8:x".parse::<DeviceRef>(),
            Err(InsteonError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_equality_ignores_button() {
        let a: DeviceRef = "42.22.B8:1".parse().unwrap();
        let b: DeviceRef = "42.22.B8:2".parse().unwrap();
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::new(0x42, 0x20, 0xF8);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"42.20.F8\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
