//! Serial port setup.
//!
//! # Example
//!
//! ```ignore
//! use insteon_gateway::transport::{open_serial, SerialSettings};
//!
//! let port = open_serial(&SerialSettings::new("/dev/ttyUSB0"))?;
//! ```

use std::time::Duration;

use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::{InsteonError, Result};

/// The gateway's fixed line rate.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Serial line settings. Only the path and baud rate are configurable;
/// the gateway always speaks 8N1.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Open the serial port for async use.
pub fn open_serial(settings: &SerialSettings) -> Result<SerialStream> {
    tracing::debug!(
        path = %settings.path,
        baud = settings.baud_rate,
        "Opening serial port"
    );

    tokio_serial::new(&settings.path, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(settings.timeout)
        .open_native_async()
        .map_err(|e| {
            InsteonError::ChannelUnavailable(format!("Failed to open {}: {}", settings.path, e))
        })
}
