//! Wire format constants and frame-length inference.
//!
//! Every gateway frame starts with a start marker and a type code:
//! ```text
//! ┌───────┬───────┬──────────────────────────────┐
//! │ 0x02  │ type  │ body (length fixed by type)  │
//! │ 1 byte│ 1 byte│ 0..23 bytes                  │
//! └───────┴───────┴──────────────────────────────┘
//! ```
//!
//! There is no length prefix. The total length is looked up from the type
//! code; two types carry a flags byte whose extended bit selects between a
//! short and a long total length.

/// Start-of-frame marker.
pub const START: u8 = 0x02;

/// Positive acknowledgement byte appended to echoes.
pub const ACK: u8 = 0x06;

/// Negative acknowledgement byte appended to echoes.
pub const NACK: u8 = 0x15;

/// Length assumed for an unknown type code before anything else is configured.
pub const DEFAULT_FRAME_LENGTH: usize = 11;

/// Number of payload bytes carried by an extended message.
pub const EXTENDED_DATA_LEN: usize = 14;

/// Gateway message type codes (byte 1 of every frame).
pub mod message {
    /// Standard Insteon message received.
    pub const STANDARD_RECEIVED: u8 = 0x50;
    /// Extended Insteon message received.
    pub const EXTENDED_RECEIVED: u8 = 0x51;
    /// X10 message received.
    pub const X10_RECEIVED: u8 = 0x52;
    /// ALL-Linking completed.
    pub const ALL_LINK_COMPLETE: u8 = 0x53;
    /// Gateway SET button event.
    pub const BUTTON_EVENT: u8 = 0x54;
    /// User reset detected.
    pub const USER_RESET: u8 = 0x55;
    /// ALL-Link cleanup failure report.
    pub const CLEANUP_FAILURE: u8 = 0x56;
    /// ALL-Link record response.
    pub const ALL_LINK_RECORD: u8 = 0x57;
    /// ALL-Link cleanup status report.
    pub const CLEANUP_STATUS: u8 = 0x58;
    /// Get gateway info.
    pub const GET_INFO: u8 = 0x60;
    /// Send ALL-Link command.
    pub const SEND_ALL_LINK: u8 = 0x61;
    /// Send Insteon standard or extended message.
    pub const SEND_INSTEON: u8 = 0x62;
    /// Send X10 message.
    pub const SEND_X10: u8 = 0x63;
    /// Start ALL-Linking.
    pub const START_LINKING: u8 = 0x64;
    /// Cancel ALL-Linking.
    pub const CANCEL_LINKING: u8 = 0x65;
    /// Reset the gateway.
    pub const RESET: u8 = 0x67;
    /// Get first ALL-Link record.
    pub const FIRST_LINK: u8 = 0x69;
    /// Get next ALL-Link record.
    pub const NEXT_LINK: u8 = 0x6A;
    /// Set gateway configuration.
    pub const SET_CONFIG: u8 = 0x6B;
    /// Get ALL-Link record for last sender.
    pub const SENDER_LINK: u8 = 0x6C;
    /// LED on.
    pub const LED_ON: u8 = 0x6D;
    /// LED off.
    pub const LED_OFF: u8 = 0x6E;
    /// Get gateway configuration.
    pub const GET_CONFIG: u8 = 0x73;
}

/// Insteon command bytes (cmd1).
pub mod command {
    pub const PRODUCT_DATA_REQUEST: u8 = 0x03;
    pub const ENGINE_VERSION: u8 = 0x0D;
    pub const ID_REQUEST: u8 = 0x10;
    pub const ON: u8 = 0x11;
    pub const FAST_ON: u8 = 0x12;
    pub const OFF: u8 = 0x13;
    pub const FAST_OFF: u8 = 0x14;
    pub const BRIGHT_STEP: u8 = 0x15;
    pub const DIM_STEP: u8 = 0x16;
    pub const START_CHANGE: u8 = 0x17;
    pub const STOP_CHANGE: u8 = 0x18;
    pub const STATUS_REQUEST: u8 = 0x19;
    pub const GET_OPERATING_FLAGS: u8 = 0x1F;
    pub const SET_OPERATING_FLAGS: u8 = 0x20;
    pub const SET_ADDRESS_MSB: u8 = 0x28;
    pub const POKE: u8 = 0x29;
    pub const PEEK: u8 = 0x2B;
    pub const ON_AT_RATE: u8 = 0x2E;
    pub const OFF_AT_RATE: u8 = 0x2F;
    /// Extended ALL-Link database read/write (same byte as OFF_AT_RATE).
    pub const LINK_DATABASE: u8 = 0x2F;
}

/// Message flag bits (byte 5 of a send, byte 8 of a received message).
pub mod flags {
    /// Broadcast bit.
    pub const BROADCAST: u8 = 0x80;
    /// Group bit.
    pub const GROUP: u8 = 0x40;
    /// Group broadcast / group cleanup category (top nibble).
    pub const GROUP_BROADCAST: u8 = 0xC0;
    /// Either broadcast-class bit.
    pub const BROADCAST_MASK: u8 = 0xC0;
    /// Extended message bit.
    pub const EXTENDED: u8 = 0x10;
    /// Direct message, max hops 3.
    pub const DIRECT_DEFAULT: u8 = 0x0F;
    /// Extended direct message, max hops 3.
    pub const EXTENDED_DEFAULT: u8 = 0x1F;
    /// Group broadcast, max hops 3.
    pub const GROUP_DEFAULT: u8 = 0xCF;

    /// Top nibble of a flags byte (the message category).
    #[inline]
    pub fn category(flags: u8) -> u8 {
        flags & 0xF0
    }

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// How the total length of a frame is determined from its type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Length fixed by the type code alone.
    Fixed(usize),
    /// Length depends on a flags byte that arrives later in the frame.
    FlagQualified {
        /// Offset of the flags byte within the frame.
        offset: usize,
        /// Bit selecting the long form.
        mask: u8,
        short: usize,
        long: usize,
    },
}

impl FrameLength {
    /// Resolve the total length given the bytes buffered so far.
    ///
    /// For flag-qualified types the short length is assumed until the flags
    /// byte has arrived.
    pub fn resolve(&self, buffered: &[u8]) -> usize {
        match *self {
            FrameLength::Fixed(len) => len,
            FrameLength::FlagQualified {
                offset,
                mask,
                short,
                long,
            } => match buffered.get(offset) {
                Some(f) if f & mask != 0 => long,
                _ => short,
            },
        }
    }
}

/// Look up the length rule for a type code. `None` for unknown codes.
pub fn frame_length(type_code: u8) -> Option<FrameLength> {
    use message::*;

    let rule = match type_code {
        STANDARD_RECEIVED => FrameLength::FlagQualified {
            offset: 8,
            mask: flags::EXTENDED,
            short: 11,
            long: 25,
        },
        EXTENDED_RECEIVED => FrameLength::Fixed(25),
        X10_RECEIVED => FrameLength::Fixed(4),
        ALL_LINK_COMPLETE => FrameLength::Fixed(10),
        BUTTON_EVENT => FrameLength::Fixed(3),
        USER_RESET => FrameLength::Fixed(2),
        CLEANUP_FAILURE => FrameLength::Fixed(7),
        ALL_LINK_RECORD => FrameLength::Fixed(10),
        CLEANUP_STATUS => FrameLength::Fixed(3),
        GET_INFO => FrameLength::Fixed(9),
        SEND_ALL_LINK => FrameLength::Fixed(6),
        SEND_INSTEON => FrameLength::FlagQualified {
            offset: 5,
            mask: flags::EXTENDED,
            short: 9,
            long: 23,
        },
        SEND_X10 => FrameLength::Fixed(5),
        START_LINKING => FrameLength::Fixed(5),
        CANCEL_LINKING => FrameLength::Fixed(3),
        RESET => FrameLength::Fixed(3),
        FIRST_LINK | NEXT_LINK => FrameLength::Fixed(3),
        SET_CONFIG => FrameLength::Fixed(4),
        SENDER_LINK => FrameLength::Fixed(3),
        LED_ON | LED_OFF => FrameLength::Fixed(3),
        GET_CONFIG => FrameLength::Fixed(6),
        _ => return None,
    };
    Some(rule)
}

/// All type codes with a known length rule.
pub const KNOWN_TYPES: &[u8] = &[
    0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x60, 0x61, 0x62, 0x63, 0x64, 0x65,
    0x67, 0x69, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x73,
];

/// Format bytes as space-separated upper-case hex, for logs and errors.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}
