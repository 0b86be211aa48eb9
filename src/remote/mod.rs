//! Remote control over UDP.
//!
//! Each datagram carries one [`RemoteCommand`], encoded with the configured
//! [`WireCodec`](crate::codec::WireCodec). The reply goes back to the sender
//! as a [`RemoteReply`].
//!
//! # Example
//!
//! ```text
//! $ echo '{"cmd":"set_level","device":"hall","level":50}' | nc -u -w1 gateway 52006
//! {"ok":true,"result":null}
//! ```

mod command;
mod server;

pub use command::{RemoteCommand, RemoteReply};
pub use server::{RemoteConfig, RemoteServer, DEFAULT_MAX_CONCURRENT, DEFAULT_REMOTE_PORT};
