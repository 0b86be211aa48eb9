//! Transport module - the byte channel to the gateway.
//!
//! Provides:
//! - [`Transport`] - any async byte stream the reader task can own
//! - [`open_serial`] - the gateway's serial port at 19200 8N1

mod serial;

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

pub use serial::{open_serial, SerialSettings, DEFAULT_BAUD_RATE};

/// A byte channel to the gateway.
///
/// The reader task owns the transport exclusively. `discard_buffers` is
/// called during a reset to drop whatever the OS has queued in either
/// direction.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Flush physical input and output buffers without reading them.
    fn discard_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for tokio::io::DuplexStream {}

impl Transport for tokio_serial::SerialStream {
    fn discard_buffers(&mut self) -> io::Result<()> {
        use tokio_serial::{ClearBuffer, SerialPort};

        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}
