//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the gateway's serial framing:
//! - Type-code length table (with flag-qualified long forms)
//! - Frame reassembler for partial reads and stray bytes
//! - Frame struct with typed accessors and outgoing message builders
//! - X10 code tables

mod frame;
mod reassembler;
pub mod wire_format;
pub mod x10;

pub use frame::{build_extended, build_gateway_command, build_standard, build_x10, Frame};
pub use reassembler::{FrameReassembler, SILENT_INTERVALS_BEFORE_RESET};
pub use wire_format::{
    command, flags, frame_length, message, to_hex, FrameLength, ACK, DEFAULT_FRAME_LENGTH,
    EXTENDED_DATA_LEN, KNOWN_TYPES, NACK, START,
};
pub use x10::X10Command;
