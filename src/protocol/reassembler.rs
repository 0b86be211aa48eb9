//! Frame reassembler for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Gateway frames carry no length
//! prefix, so the reassembler looks the total length up from the type code as
//! soon as byte 1 arrives, and re-evaluates it for flag-qualified types once
//! the flags byte is buffered.
//!
//! # Example
//!
//! ```
//! use insteon_gateway::protocol::FrameReassembler;
//!
//! let mut reassembler = FrameReassembler::new();
//!
//! // Two stray bytes, then a user-reset frame split across reads.
//! assert!(reassembler.push(&[0xFF, 0x00, 0x02]).is_empty());
//! let frames = reassembler.push(&[0x55]);
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].as_bytes(), &[0x02, 0x55]);
//! assert_eq!(reassembler.take_stray(), vec![0xFF, 0x00]);
//! ```

use bytes::BytesMut;

use super::wire_format::{frame_length, DEFAULT_FRAME_LENGTH, START};
use super::Frame;

/// Longest frame the gateway produces.
const MAX_FRAME_LEN: usize = 25;

/// Silent intervals with a partial frame buffered before a reset is requested.
pub const SILENT_INTERVALS_BEFORE_RESET: u32 = 2;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameReassembler {
    /// Bytes of the frame in progress, start marker first.
    buffer: BytesMut,
    /// Bytes discarded while hunting for a start marker.
    stray: Vec<u8>,
    /// Length hint from the pending request, used for unknown type codes.
    length_hint: Option<usize>,
    /// Length used for the previous frame; fallback when no hint is set.
    last_length: usize,
    /// Consecutive read timeouts with a partial frame buffered.
    silent_intervals: u32,
}

impl FrameReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
            stray: Vec::new(),
            length_hint: None,
            last_length: DEFAULT_FRAME_LENGTH,
            silent_intervals: 0,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push. Bytes before a start marker
    /// are collected as stray and reported once per push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let stray_before = self.stray.len();

        if !data.is_empty() {
            self.silent_intervals = 0;
        }

        for &byte in data {
            if self.buffer.is_empty() {
                if byte == START {
                    self.buffer.extend_from_slice(&[byte]);
                } else {
                    self.stray.push(byte);
                }
                continue;
            }

            self.buffer.extend_from_slice(&[byte]);

            if self.buffer.len() >= self.expected_length() {
                let bytes = self.buffer.split().freeze();
                frames.push(Frame::new(bytes));
            }
        }

        let new_stray = self.stray.len() - stray_before;
        if new_stray > 0 {
            tracing::warn!(
                count = new_stray,
                bytes = %super::wire_format::to_hex(&self.stray[stray_before..]),
                "Discarded stray bytes before start marker"
            );
        }

        frames
    }

    /// Total length of the frame in progress, given what has arrived so far.
    fn expected_length(&mut self) -> usize {
        if self.buffer.len() < 2 {
            return usize::MAX;
        }
        let type_code = self.buffer[1];
        match frame_length(type_code) {
            Some(rule) => {
                let len = rule.resolve(&self.buffer);
                self.last_length = len;
                len
            }
            None => {
                let len = self.length_hint.unwrap_or(self.last_length);
                if self.buffer.len() == 2 {
                    tracing::warn!(
                        type_code = format_args!("0x{:02X}", type_code),
                        assumed_len = len,
                        "Unknown message type"
                    );
                }
                len
            }
        }
    }

    /// Record one read timeout.
    ///
    /// Returns true when a partial frame has now been stuck for
    /// [`SILENT_INTERVALS_BEFORE_RESET`] consecutive intervals; the caller
    /// should reset the channel.
    pub fn on_silence(&mut self) -> bool {
        if self.buffer.is_empty() {
            self.silent_intervals = 0;
            return false;
        }
        self.silent_intervals += 1;
        if self.silent_intervals >= SILENT_INTERVALS_BEFORE_RESET {
            tracing::warn!(
                buffered = %super::wire_format::to_hex(&self.buffer),
                "Partial frame stalled"
            );
            true
        } else {
            false
        }
    }

    /// Set or clear the length hint used for unknown type codes.
    pub fn set_length_hint(&mut self, hint: Option<usize>) {
        self.length_hint = hint;
    }

    /// Take the stray bytes collected so far.
    pub fn take_stray(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stray)
    }

    /// Get the number of buffered bytes of the frame in progress.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no frame is in progress.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop the frame in progress and any hint. Stray bytes are kept.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.length_hint = None;
        self.silent_intervals = 0;
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::{FrameLength, KNOWN_TYPES};

    /// A well-formed frame of `type_code`, long form when `extended`.
    fn sample_frame(type_code: u8, extended: bool) -> Vec<u8> {
        let rule = frame_length(type_code).unwrap();
        let len = match rule {
            FrameLength::Fixed(n) => n,
            FrameLength::FlagQualified { short, long, .. } => {
                if extended {
                    long
                } else {
                    short
                }
            }
        };
        let mut frame = vec![0x11u8; len];
        frame[0] = START;
        frame[1] = type_code;
        if let FrameLength::FlagQualified { offset, mask, .. } = rule {
            frame[offset] = if extended { mask } else { 0x00 };
        }
        frame
    }

    #[test]
    fn test_every_type_with_stray_prefix() {
        for &t in KNOWN_TYPES {
            for extended in [false, true] {
                for strays in 0..4usize {
                    let mut reassembler = FrameReassembler::new();
                    let frame = sample_frame(t, extended);
                    let mut data = vec![0xAAu8; strays];
                    data.extend_from_slice(&frame);

                    let frames = reassembler.push(&data);
                    assert_eq!(frames.len(), 1, "type {:02X} strays {}", t, strays);
                    assert_eq!(frames[0].as_bytes(), &frame[..]);
                    assert_eq!(reassembler.take_stray().len(), strays);
                    assert!(reassembler.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut reassembler = FrameReassembler::new();
        let frame = sample_frame(0x62, true);
        let mut all = Vec::new();
        for byte in &frame {
            all.extend(reassembler.push(&[*byte]));
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].len(), 23);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut reassembler = FrameReassembler::new();
        let mut data = sample_frame(0x50, false);
        data.extend(sample_frame(0x57, false));
        data.extend(sample_frame(0x51, false));

        let frames = reassembler.push(&data);
        let lens: Vec<usize> = frames.iter().map(Frame::len).collect();
        assert_eq!(lens, vec![11, 10, 25]);
    }

    #[test]
    fn test_unknown_type_uses_hint() {
        let mut reassembler = FrameReassembler::new();
        reassembler.set_length_hint(Some(4));
        let frames = reassembler.push(&[0x02, 0x99, 0x01, 0x02]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 4);
    }

    #[test]
    fn test_unknown_type_falls_back_to_last_length() {
        let mut reassembler = FrameReassembler::new();
        // Initial fallback is 11.
        let mut data = vec![0x02, 0x99];
        data.extend_from_slice(&[0u8; 9]);
        let frames = reassembler.push(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 11);

        // After a 9-byte info frame, the fallback follows it.
        reassembler.push(&sample_frame(0x60, false));
        let frames = reassembler.push(&[0x02, 0x99, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 9);
    }

    #[test]
    fn test_silence_with_partial_frame() {
        let mut reassembler = FrameReassembler::new();
        assert!(!reassembler.on_silence());

        reassembler.push(&[0x02, 0x62, 0x01]);
        assert!(!reassembler.on_silence());
        assert!(reassembler.on_silence());
    }

    #[test]
    fn test_data_resets_silence_count() {
        let mut reassembler = FrameReassembler::new();
        reassembler.push(&[0x02, 0x62]);
        assert!(!reassembler.on_silence());
        reassembler.push(&[0x01]);
        assert!(!reassembler.on_silence());
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut reassembler = FrameReassembler::new();
        reassembler.push(&[0x02, 0x50, 0x01]);
        assert_eq!(reassembler.len(), 3);
        reassembler.clear();
        assert!(reassembler.is_empty());

        let frames = reassembler.push(&sample_frame(0x55, false));
        assert_eq!(frames.len(), 1);
    }
}
