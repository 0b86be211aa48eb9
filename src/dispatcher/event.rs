//! Decoded unsolicited messages.

use crate::address::Address;
use crate::protocol::{flags, Frame};

/// The decoded content of an unsolicited frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMessage {
    /// A standard or extended Insteon message.
    Insteon {
        from: Address,
        to: Address,
        /// Target byte 3; the group/button number for group broadcasts.
        button: u8,
        flags: u8,
        cmd1: u8,
        cmd2: u8,
    },
    /// An X10 message, kept raw.
    X10 { raw: u8, flag: u8 },
    /// Anything else the router handed over.
    Other,
}

/// An unsolicited message, decoded alongside its frame.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub frame: Frame,
    pub message: EventMessage,
}

impl DeviceEvent {
    /// Decode a frame.
    pub fn decode(frame: Frame) -> Self {
        let message = if frame.is_x10_received() {
            EventMessage::X10 {
                raw: frame.get(2).unwrap_or(0),
                flag: frame.get(3).unwrap_or(0),
            }
        } else if frame.is_insteon_received() {
            match (
                frame.from_address(),
                frame.to_address(),
                frame.message_flags(),
                frame.cmd1(),
                frame.cmd2(),
            ) {
                (Some(from), Some(to), Some(flags), Some(cmd1), Some(cmd2)) => {
                    EventMessage::Insteon {
                        from,
                        to,
                        button: to.low(),
                        flags,
                        cmd1,
                        cmd2,
                    }
                }
                _ => EventMessage::Other,
            }
        } else {
            EventMessage::Other
        };
        Self { frame, message }
    }

    /// Source address of an Insteon message.
    pub fn from(&self) -> Option<Address> {
        match self.message {
            EventMessage::Insteon { from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn cmd1(&self) -> Option<u8> {
        match self.message {
            EventMessage::Insteon { cmd1, .. } => Some(cmd1),
            _ => None,
        }
    }

    pub fn cmd2(&self) -> Option<u8> {
        match self.message {
            EventMessage::Insteon { cmd2, .. } => Some(cmd2),
            _ => None,
        }
    }

    pub fn button(&self) -> Option<u8> {
        match self.message {
            EventMessage::Insteon { button, .. } => Some(button),
            _ => None,
        }
    }

    pub fn flags(&self) -> Option<u8> {
        match self.message {
            EventMessage::Insteon { flags, .. } => Some(flags),
            _ => None,
        }
    }

    /// Whether the flags' top nibble marks a group broadcast.
    pub fn is_group_broadcast(&self) -> bool {
        self.flags()
            .map(|f| flags::category(f) == flags::GROUP_BROADCAST)
            .unwrap_or(false)
    }
}
