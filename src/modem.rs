//! Modem handle, builder and transactions.
//!
//! The [`ModemBuilder`] provides a fluent API for configuring timeouts and the
//! device registry. Building spawns two workers:
//! 1. The reader task, which owns the transport
//! 2. The dispatcher task, which consumes unsolicited events
//!
//! Callers talk to the gateway through a [`Transaction`], an exclusive handle
//! that serializes request/response exchanges on the half-duplex line.
//!
//! # Example
//!
//! ```ignore
//! use insteon_gateway::transport::{open_serial, SerialSettings};
//! use insteon_gateway::{Address, Modem};
//!
//! #[tokio::main]
//! async fn main() -> insteon_gateway::Result<()> {
//!     let port = open_serial(&SerialSettings::new("/dev/ttyUSB0"))?;
//!     let modem = Modem::builder().build(port);
//!
//!     let mut tx = modem.transaction().await;
//!     let status = tx
//!         .send_standard(Address::new(0x12, 0x5F, 0x5E), 0x19, 0x00, 0x0F)
//!         .await?;
//!     println!("level = {:?}", status.last());
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use crate::address::Address;
use crate::dispatcher::{spawn_dispatcher, DeviceEvent, ListenerFilter, ListenerId, ListenerRegistry};
use crate::error::{InsteonError, Result};
use crate::protocol::{
    build_extended, build_standard, command, flags, to_hex, Frame, ACK, EXTENDED_DATA_LEN, NACK,
};
use crate::reader::{spawn_reader, Envelope, Intent, SharedState};
use crate::registry::{DeviceRegistry, MemoryRegistry};
use crate::router::PendingRequest;
use crate::transport::Transport;

/// Default wait for the echo of a transmitted message.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for a deferred response after an ACK.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(8);

/// Default read timeout of the reader task (one silent interval).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay before querying a responder after a group broadcast.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(4);

/// Default delay between retries of register reads and writes.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default gap between the two halves of an X10 send.
pub const DEFAULT_X10_DELAY: Duration = Duration::from_millis(500);

/// Default number of waits for a worker to stop during shutdown.
pub const DEFAULT_SHUTDOWN_ATTEMPTS: u32 = 3;

/// Default length of each shutdown wait.
pub const DEFAULT_SHUTDOWN_INTERVAL: Duration = Duration::from_millis(250);

/// Response length for a standard message with the given flags and command.
///
/// Broadcasts get no deferred response. An ID request is answered with a
/// direct ACK followed by the device's set-button broadcast (22 bytes).
pub fn expected_standard_response(flags_byte: u8, cmd1: u8) -> usize {
    if flags_byte & flags::BROADCAST_MASK != 0 {
        0
    } else if cmd1 == command::ID_REQUEST {
        22
    } else {
        11
    }
}

/// Timing configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    pub echo_timeout: Duration,
    pub response_timeout: Duration,
    pub read_timeout: Duration,
    pub settle_delay: Duration,
    pub retry_delay: Duration,
    pub x10_delay: Duration,
    pub shutdown_attempts: u32,
    pub shutdown_interval: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            x10_delay: DEFAULT_X10_DELAY,
            shutdown_attempts: DEFAULT_SHUTDOWN_ATTEMPTS,
            shutdown_interval: DEFAULT_SHUTDOWN_INTERVAL,
        }
    }
}

/// Builder for configuring and creating a [`Modem`].
pub struct ModemBuilder {
    config: ModemConfig,
    registry: Option<Arc<dyn DeviceRegistry>>,
}

impl ModemBuilder {
    /// Create a new builder with default timings and an empty registry.
    pub fn new() -> Self {
        Self {
            config: ModemConfig::default(),
            registry: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ModemConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the echo timeout.
    ///
    /// Default: 1 second
    pub fn echo_timeout(mut self, timeout: Duration) -> Self {
        self.config.echo_timeout = timeout;
        self
    }

    /// Set the deferred response timeout.
    ///
    /// Default: 8 seconds
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set the reader's read timeout. Two consecutive timeouts with a partial
    /// frame buffered reset the channel.
    ///
    /// Default: 1 second
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the delay before responders are queried after a group broadcast.
    ///
    /// Default: 4 seconds
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Set the delay between register retries.
    ///
    /// Default: 500 ms
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the gap between the unit and command halves of an X10 send.
    ///
    /// Default: 500 ms
    pub fn x10_delay(mut self, delay: Duration) -> Self {
        self.config.x10_delay = delay;
        self
    }

    /// Use `registry` for name lookup, responders and the state mirror.
    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawn the workers over `transport` and return the handle.
    ///
    /// Must be called within a tokio runtime.
    pub fn build<T: Transport>(self, transport: T) -> Modem {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryRegistry::default()) as Arc<dyn DeviceRegistry>);
        let shared = Arc::new(SharedState::default());
        let (channels, reader_task) =
            spawn_reader(transport, shared.clone(), self.config.read_timeout);

        let modem = Modem {
            inner: Arc::new(ModemInner {
                config: self.config,
                intents: channels.intents,
                answers: tokio::sync::Mutex::new(channels.answers),
                shared,
                registry,
                listeners: ListenerRegistry::new(),
                reader_task: Mutex::new(Some(reader_task)),
                dispatcher_task: Mutex::new(None),
            }),
        };

        let dispatcher_task = spawn_dispatcher(channels.events, modem.downgrade());
        if let Ok(mut slot) = modem.inner.dispatcher_task.lock() {
            *slot = Some(dispatcher_task);
        }

        modem
    }
}

impl Default for ModemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ModemInner {
    config: ModemConfig,
    intents: mpsc::UnboundedSender<Intent>,
    answers: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    shared: Arc<SharedState>,
    registry: Arc<dyn DeviceRegistry>,
    listeners: ListenerRegistry,
    reader_task: Mutex<Option<JoinHandle<Result<()>>>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
}

/// A running gateway engine. Cheap to clone.
#[derive(Clone)]
pub struct Modem {
    inner: Arc<ModemInner>,
}

/// A non-owning handle, used by workers and timers so they do not keep the
/// engine alive.
#[derive(Clone)]
pub struct WeakModem {
    inner: Weak<ModemInner>,
}

impl WeakModem {
    pub fn upgrade(&self) -> Option<Modem> {
        self.inner.upgrade().map(|inner| Modem { inner })
    }
}

fn channel_closed() -> InsteonError {
    InsteonError::ChannelUnavailable("gateway reader has stopped".into())
}

impl Modem {
    /// Create a new modem builder.
    pub fn builder() -> ModemBuilder {
        ModemBuilder::new()
    }

    pub fn config(&self) -> &ModemConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.inner.registry
    }

    pub fn downgrade(&self) -> WeakModem {
        WeakModem {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Start an exclusive transaction, waiting for any current one to end.
    ///
    /// Answers left over from earlier transactions are discarded.
    pub async fn transaction(&self) -> Transaction<'_> {
        let mut answers = self.inner.answers.lock().await;
        let mut stale = 0usize;
        while answers.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(count = stale, "Discarded stale answers");
        }
        Transaction {
            modem: self,
            answers,
        }
    }

    /// Reset the channel: drop the pending request and any partial frame,
    /// flush the physical buffers and invalidate queued frames.
    ///
    /// Returns the new reset count.
    pub async fn reset(&self, reason: &str) -> Result<u64> {
        let (done, rx) = oneshot::channel();
        self.inner
            .intents
            .send(Intent::Reset {
                reason: reason.to_string(),
                done: Some(done),
            })
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())
    }

    /// Number of resets so far.
    pub fn reset_count(&self) -> u64 {
        self.inner.shared.epoch()
    }

    /// Take the stray bytes discarded by the reassembler since the last call.
    pub fn take_stray(&self) -> Vec<u8> {
        self.inner
            .shared
            .stray
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    /// Whether the reader task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.inner.intents.is_closed()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    /// Register an event listener. `None` receives every unsolicited message.
    pub fn register_listener<F>(&self, filter: Option<ListenerFilter>, callback: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.register(filter, callback)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unregister(id)
    }

    /// Remove every listener. Returns how many were removed.
    pub fn unregister_all(&self) -> usize {
        self.inner.listeners.clear()
    }

    /// Stop the workers.
    ///
    /// Each worker gets a bounded number of waits to finish before it is
    /// aborted.
    pub async fn shutdown(&self) {
        let _ = self.inner.intents.send(Intent::Shutdown);

        let reader = self.inner.reader_task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = reader {
            if let Some(Ok(Err(e))) = self.join_worker("reader", handle).await {
                tracing::error!("Reader stopped with error: {}", e);
            }
        }

        let dispatcher = self
            .inner
            .dispatcher_task
            .lock()
            .ok()
            .and_then(|mut t| t.take());
        if let Some(handle) = dispatcher {
            self.join_worker("dispatcher", handle).await;
        }
    }

    async fn join_worker<T>(
        &self,
        name: &str,
        mut handle: JoinHandle<T>,
    ) -> Option<std::result::Result<T, tokio::task::JoinError>> {
        let config = &self.inner.config;
        for attempt in 1..=config.shutdown_attempts {
            match timeout(config.shutdown_interval, &mut handle).await {
                Ok(result) => return Some(result),
                Err(_) => tracing::debug!(attempt, "Waiting for {} to stop", name),
            }
        }
        tracing::warn!("{} did not stop in time; aborting", name);
        handle.abort();
        None
    }
}

/// Exclusive use of the gateway for one request/response exchange (or a
/// series of them).
///
/// Dropping the transaction releases the pending request.
pub struct Transaction<'a> {
    modem: &'a Modem,
    answers: MutexGuard<'a, mpsc::UnboundedReceiver<Envelope>>,
}

impl<'a> Transaction<'a> {
    /// Transmit raw bytes and wait for the reply.
    ///
    /// With `expect_echo`, the gateway must echo `bytes` followed by ACK or
    /// NACK. After an ACK, a deferred response of `expected_len` bytes is
    /// awaited when `expected_len > 0`; otherwise the echo is returned.
    /// Without `expect_echo`, the next frame is returned as is.
    pub async fn send_raw(
        &mut self,
        bytes: &[u8],
        expected_len: usize,
        expect_echo: bool,
    ) -> Result<Frame> {
        let config = self.modem.config().clone();
        let hint = if expect_echo {
            Some(bytes.len() + 1)
        } else if expected_len > 0 {
            Some(expected_len)
        } else {
            None
        };
        self.transmit(PendingRequest::new(Bytes::copy_from_slice(bytes), hint))
            .await?;

        let echo = match self.recv_answer(config.echo_timeout).await? {
            Some(frame) => frame,
            None => return Err(self.desync(InsteonError::AckTimeout).await),
        };

        if !expect_echo {
            return Ok(echo);
        }

        let common = echo.len().min(bytes.len());
        if echo.as_bytes()[..common] != bytes[..common] {
            return Err(self
                .desync(InsteonError::EchoMismatch {
                    sent: to_hex(bytes),
                    received: echo.to_string(),
                })
                .await);
        }
        if echo.len() != bytes.len() + 1 {
            return Err(self
                .desync(InsteonError::LengthMismatch {
                    expected: bytes.len() + 1,
                    actual: echo.len(),
                })
                .await);
        }

        match echo.last() {
            Some(ACK) => {}
            Some(NACK) => {
                self.release();
                return Err(InsteonError::Nack);
            }
            Some(other) => return Err(self.desync(InsteonError::InvalidAck(other)).await),
            None => return Err(self.desync(InsteonError::InvalidAck(0)).await),
        }

        if expected_len == 0 {
            return Ok(echo);
        }

        match self.recv_answer(config.response_timeout).await? {
            Some(response) => Ok(response),
            None => Err(self.desync(InsteonError::ResponseTimeout).await),
        }
    }

    /// Send a standard Insteon message.
    pub async fn send_standard(
        &mut self,
        address: Address,
        cmd1: u8,
        cmd2: u8,
        flags_byte: u8,
    ) -> Result<Frame> {
        let msg = build_standard(address, flags_byte, cmd1, cmd2);
        let expected = expected_standard_response(flags_byte, cmd1);
        self.send_raw(&msg, expected, true).await
    }

    /// Send an extended Insteon message carrying exactly 14 data bytes.
    ///
    /// Returns the device's standard acknowledgement. Any extended replies
    /// that follow are read with [`next_frame`](Self::next_frame).
    pub async fn send_extended(
        &mut self,
        address: Address,
        cmd1: u8,
        cmd2: u8,
        data: &[u8],
        flags_byte: u8,
    ) -> Result<Frame> {
        if data.len() != EXTENDED_DATA_LEN {
            return Err(InsteonError::InvalidParameter(format!(
                "Extended data must be {} bytes, got {}",
                EXTENDED_DATA_LEN,
                data.len()
            )));
        }
        let msg = build_extended(address, flags_byte, cmd1, cmd2, data);
        self.send_raw(&msg, 11, true).await
    }

    /// Wait for the next frame addressed to this transaction.
    ///
    /// A timeout resets the channel and returns `ResponseTimeout`.
    pub async fn next_frame(&mut self, wait: Duration) -> Result<Frame> {
        match self.recv_answer(wait).await? {
            Some(frame) => Ok(frame),
            None => Err(self.desync(InsteonError::ResponseTimeout).await),
        }
    }

    async fn transmit(&mut self, request: PendingRequest) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.modem
            .inner
            .intents
            .send(Intent::Transmit { request, done })
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())??;
        Ok(())
    }

    /// Next answer from the current epoch, or `None` on timeout.
    async fn recv_answer(&mut self, wait: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + wait;
        loop {
            match timeout_at(deadline, self.answers.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(channel_closed()),
                Ok(Some(envelope)) => {
                    if envelope.epoch < self.modem.reset_count() {
                        tracing::debug!("Dropping answer from before reset: {}", envelope.frame);
                        continue;
                    }
                    return Ok(Some(envelope.frame));
                }
            }
        }
    }

    fn release(&self) {
        let _ = self.modem.inner.intents.send(Intent::Release);
    }

    /// Reset the channel and hand back `err`.
    async fn desync(&self, err: InsteonError) -> InsteonError {
        if let Err(e) = self.modem.reset(&err.to_string()).await {
            tracing::warn!("Reset after '{}' failed: {}", err, e);
        }
        err
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
