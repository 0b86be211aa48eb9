//! ALL-Link database records.

use std::fmt;

use serde::Serialize;

use crate::address::Address;

/// Size of one link record in device memory.
pub const RECORD_LEN: usize = 8;

/// Flags byte of a controller record (in use, controller, high-water).
pub const CONTROLLER_FLAGS: u8 = 0xE2;

/// Flags byte of a responder record (in use, responder, high-water).
pub const RESPONDER_FLAGS: u8 = 0xA2;

/// Default on-level written into new records.
pub const DEFAULT_ON_LEVEL: u8 = 0xFF;

/// Default ramp rate written into new records.
pub const DEFAULT_RAMP_RATE: u8 = 0x1C;

/// One 8-byte link record: `flags group peer(3) data1 data2 data3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub flags: u8,
    pub group: u8,
    pub peer: Address,
    pub data: [u8; 3],
}

impl LinkRecord {
    /// Parse the first 8 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..RECORD_LEN)?;
        Some(Self {
            flags: bytes[0],
            group: bytes[1],
            peer: Address::new(bytes[2], bytes[3], bytes[4]),
            data: [bytes[5], bytes[6], bytes[7]],
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let [a, b, c] = self.peer.bytes();
        [
            self.flags,
            self.group,
            a,
            b,
            c,
            self.data[0],
            self.data[1],
            self.data[2],
        ]
    }

    /// A record marking `responder` as controlled by this device.
    pub fn controller(group: u8, responder: Address, button: u8) -> Self {
        Self {
            flags: CONTROLLER_FLAGS,
            group,
            peer: responder,
            data: [DEFAULT_ON_LEVEL, DEFAULT_RAMP_RATE, button],
        }
    }

    /// A record making this device respond to `controller`.
    pub fn responder(group: u8, controller: Address, button: u8) -> Self {
        Self {
            flags: RESPONDER_FLAGS,
            group,
            peer: controller,
            data: [DEFAULT_ON_LEVEL, DEFAULT_RAMP_RATE, button],
        }
    }

    /// An all-zero record, used to erase a slot.
    pub fn empty() -> Self {
        Self {
            flags: 0,
            group: 0,
            peer: Address::new(0, 0, 0),
            data: [0; 3],
        }
    }

    /// A zero flags byte ends the table.
    pub fn is_terminator(&self) -> bool {
        self.flags == 0
    }

    pub fn is_controller(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

impl fmt::Display for LinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {} {:02X} {:02X} {:02X}",
            self.flags, self.group, self.peer, self.data[0], self.data[1], self.data[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYPAD: Address = Address::new(0x12, 0x5F, 0x5E);

    #[test]
    fn test_controller_layout() {
        let record = LinkRecord::controller(3, KEYPAD, 3);
        assert_eq!(
            record.to_bytes(),
            [0xE2, 0x03, 0x12, 0x5F, 0x5E, 0xFF, 0x1C, 0x03]
        );
        assert!(record.is_controller());
    }

    #[test]
    fn test_responder_layout() {
        let record = LinkRecord::responder(1, KEYPAD, 0);
        assert_eq!(
            record.to_bytes(),
            [0xA2, 0x01, 0x12, 0x5F, 0x5E, 0xFF, 0x1C, 0x00]
        );
        assert!(!record.is_controller());
    }

    #[test]
    fn test_from_short_slice() {
        assert!(LinkRecord::from_bytes(&[0xE2, 0x01, 0x12]).is_none());
    }

    #[test]
    fn test_terminator() {
        assert!(LinkRecord::empty().is_terminator());
        assert!(!LinkRecord::responder(1, KEYPAD, 0).is_terminator());
    }

    #[test]
    fn test_display() {
        let record = LinkRecord::responder(1, KEYPAD, 0);
        assert_eq!(record.to_string(), "A2 01 12.5F.5E FF 1C 00");
    }
}
