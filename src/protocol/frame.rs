//! Frame struct with typed accessors.
//!
//! A frame is the complete byte sequence of one gateway message, start marker
//! included. Uses `bytes::Bytes` so frames can be handed across queues without
//! copying.
//!
//! # Example
//!
//! ```
//! use insteon_gateway::protocol::{Frame, message};
//!
//! let frame = Frame::from_slice(&[0x02, 0x50, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x2F, 0x11, 0xFF]);
//! assert_eq!(frame.type_code(), message::STANDARD_RECEIVED);
//! assert_eq!(frame.cmd1(), Some(0x11));
//! assert_eq!(frame.last(), Some(0xFF));
//! ```

use std::fmt;

use bytes::Bytes;

use super::wire_format::{flags, message, to_hex, ACK, NACK, START};
use crate::address::Address;

/// A complete gateway frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Wrap already-framed bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// All bytes of the frame, start marker included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get a clone of the bytes (cheap, zero-copy).
    #[inline]
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, if present.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// The message type code (byte 1).
    #[inline]
    pub fn type_code(&self) -> u8 {
        self.get(1).unwrap_or(0)
    }

    /// The final byte: ACK/NACK for echoes, cmd2 for standard messages.
    #[inline]
    pub fn last(&self) -> Option<u8> {
        self.bytes.last().copied()
    }

    /// Whether this is a received Insteon message (standard or extended).
    pub fn is_insteon_received(&self) -> bool {
        matches!(
            self.type_code(),
            message::STANDARD_RECEIVED | message::EXTENDED_RECEIVED
        )
    }

    /// Whether this is a received X10 message.
    pub fn is_x10_received(&self) -> bool {
        self.type_code() == message::X10_RECEIVED
    }

    /// Source address of a received Insteon message (bytes 2..5).
    pub fn from_address(&self) -> Option<Address> {
        self.bytes.get(2..5).and_then(Address::from_slice)
    }

    /// Target address of a received Insteon message (bytes 5..8).
    pub fn to_address(&self) -> Option<Address> {
        self.bytes.get(5..8).and_then(Address::from_slice)
    }

    /// Target address of a transmitted `02 62` message (bytes 2..5).
    pub fn send_target(&self) -> Option<Address> {
        if self.type_code() == message::SEND_INSTEON {
            self.from_address()
        } else {
            None
        }
    }

    /// Message flags of a received Insteon message (byte 8).
    pub fn message_flags(&self) -> Option<u8> {
        self.get(8)
    }

    /// Command 1 of a received Insteon message (byte 9).
    pub fn cmd1(&self) -> Option<u8> {
        self.get(9)
    }

    /// Command 2 of a received Insteon message (byte 10).
    pub fn cmd2(&self) -> Option<u8> {
        self.get(10)
    }

    /// User data of a received extended message (bytes 11..25).
    pub fn user_data(&self) -> Option<&[u8]> {
        self.bytes.get(11..25)
    }

    /// Whether the flags mark a group broadcast.
    pub fn is_group_broadcast(&self) -> bool {
        self.message_flags()
            .map(|f| flags::category(f) == flags::GROUP_BROADCAST)
            .unwrap_or(false)
    }

    /// Whether this frame is `sent` echoed back with a trailing ACK.
    pub fn is_ack_of(&self, sent: &[u8]) -> bool {
        self.len() == sent.len() + 1 && self.bytes.starts_with(sent) && self.last() == Some(ACK)
    }

    /// Whether this frame is `sent` echoed back with a trailing NACK.
    pub fn is_nack_of(&self, sent: &[u8]) -> bool {
        self.len() == sent.len() + 1 && self.bytes.starts_with(sent) && self.last() == Some(NACK)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]", to_hex(&self.bytes))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.bytes))
    }
}

impl From<Vec<u8>> for Frame {
    fn from(value: Vec<u8>) -> Self {
        Self::new(Bytes::from(value))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// ============================================================================
// Outgoing message builders
// ============================================================================

/// Build a standard `02 62` message. The extended bit is always cleared.
pub fn build_standard(address: Address, flags_byte: u8, cmd1: u8, cmd2: u8) -> Vec<u8> {
    let [a, b, c] = address.bytes();
    vec![
        START,
        message::SEND_INSTEON,
        a,
        b,
        c,
        flags_byte & !flags::EXTENDED,
        cmd1,
        cmd2,
    ]
}

/// Build an extended `02 62` message carrying 14 data bytes.
///
/// The extended bit is always set. Callers check `data.len()` beforehand.
pub fn build_extended(
    address: Address,
    flags_byte: u8,
    cmd1: u8,
    cmd2: u8,
    data: &[u8],
) -> Vec<u8> {
    let [a, b, c] = address.bytes();
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&[
        START,
        message::SEND_INSTEON,
        a,
        b,
        c,
        flags_byte | flags::EXTENDED,
        cmd1,
        cmd2,
    ]);
    out.extend_from_slice(data);
    out
}

/// Build a `02 63` X10 message (a unit code or a command code).
pub fn build_x10(raw: u8, x10_flag: u8) -> Vec<u8> {
    vec![START, message::SEND_X10, raw, x10_flag]
}

/// Build a bare two-byte gateway command such as `02 60` or `02 69`.
pub fn build_gateway_command(type_code: u8) -> Vec<u8> {
    vec![START, type_code]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_received(from: [u8; 3], flags_byte: u8, cmd1: u8, cmd2: u8) -> Frame {
        Frame::from_slice(&[
            0x02, 0x50, from[0], from[1], from[2], 0x44, 0x85, 0x11, flags_byte, cmd1, cmd2,
        ])
    }

    #[test]
    fn test_received_accessors() {
        let frame = standard_received([0x12, 0x5F, 0x5E], 0x2F, 0x19, 0x80);
        assert!(frame.is_insteon_received());
        assert_eq!(frame.from_address(), Some(Address::new(0x12, 0x5F, 0x5E)));
        assert_eq!(frame.to_address(), Some(Address::new(0x44, 0x85, 0x11)));
        assert_eq!(frame.message_flags(), Some(0x2F));
        assert_eq!(frame.cmd1(), Some(0x19));
        assert_eq!(frame.cmd2(), Some(0x80));
        assert!(!frame.is_group_broadcast());
    }

    #[test]
    fn test_group_broadcast() {
        let frame = standard_received([1, 2, 3], 0xCF, 0x11, 0x00);
        assert!(frame.is_group_broadcast());
    }

    #[test]
    fn test_short_frame_accessors_are_none() {
        let frame = Frame::from_slice(&[0x02, 0x55]);
        assert_eq!(frame.from_address(), None);
        assert_eq!(frame.cmd1(), None);
        assert_eq!(frame.user_data(), None);
    }

    #[test]
    fn test_build_standard_clears_extended_bit() {
        let bytes = build_standard(Address::new(0x12, 0x5F, 0x5E), 0x1F, 0x11, 0x80);
        assert_eq!(bytes, vec![0x02, 0x62, 0x12, 0x5F, 0x5E, 0x0F, 0x11, 0x80]);
    }

    #[test]
    fn test_build_extended_sets_extended_bit() {
        let data = [0u8; 14];
        let bytes = build_extended(Address::new(1, 2, 3), 0x0F, 0x2F, 0x00, &data);
        assert_eq!(bytes.len(), 22);
        assert_eq!(bytes[5], 0x1F);
    }

    #[test]
    fn test_echo_checks() {
        let sent = build_standard(Address::new(1, 2, 3), 0x0F, 0x11, 0xFF);
        let mut echo = sent.clone();
        echo.push(ACK);
        assert!(Frame::from(echo.clone()).is_ack_of(&sent));
        *echo.last_mut().unwrap() = NACK;
        assert!(Frame::from(echo).is_nack_of(&sent));
    }

    #[test]
    fn test_send_target() {
        let sent = Frame::from(build_standard(Address::new(9, 8, 7), 0x0F, 0x19, 0));
        assert_eq!(sent.send_target(), Some(Address::new(9, 8, 7)));
        assert_eq!(Frame::from_slice(&[0x02, 0x60]).send_target(), None);
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(Frame::from_slice(&[0x02, 0x60]).to_string(), "02 60");
    }
}
