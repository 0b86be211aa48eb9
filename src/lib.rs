//! # insteon-gateway
//!
//! Engine for an Insteon power-line modem (PLM) attached over a serial line.
//!
//! One reader task owns the line. Callers take a [`Transaction`] to send a
//! frame and wait for its echo and response; everything the modem says that
//! nobody asked for becomes a [`DeviceEvent`] for registered listeners.
//!
//! ## Architecture
//!
//! - **Protocol**: frame lengths, builders and the stream reassembler
//! - **Reader/router**: classifies each frame as an answer, an event or noise
//! - **Modem**: serialized transactions, resets, listener registry
//! - **Commands/links**: device operations and link-table management
//! - **Scheduler**: interval, daily (incl. sunrise/sunset) and trigger timers
//! - **Remote**: UDP command server speaking JSON or MsgPack
//!
//! ## Example
//!
//! ```ignore
//! use insteon_gateway::{Level, Modem};
//! use insteon_gateway::transport::{open_serial, SerialSettings};
//!
//! #[tokio::main]
//! async fn main() -> insteon_gateway::Result<()> {
//!     let port = open_serial(&SerialSettings::new("/dev/ttyUSB0"))?;
//!     let modem = Modem::builder().build(port);
//!
//!     let hall = modem.resolve("12.5F.5E")?;
//!     modem.set_level(hall.address, Level::Percent(50)).await?;
//!
//!     modem.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod links;
pub mod modem;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod router;
pub mod scheduler;
pub mod transport;

mod reader;

pub use address::{Address, DeviceRef};
pub use commands::{DeviceCategory, DeviceModel, GatewayInfo, Level, LevelSource, LevelUnit};
pub use dispatcher::{DeviceEvent, ListenerFilter, ListenerId};
pub use error::{InsteonError, Result};
pub use links::{LinkAccess, LinkRecord};
pub use modem::{Modem, ModemBuilder, ModemConfig, Transaction, WeakModem};
pub use registry::{DeviceRegistry, DeviceType, MemoryRegistry};
pub use scheduler::{Action, Scheduler, TimerId};
