//! Dedicated reader task owning the gateway channel.
//!
//! The serial line is half-duplex and shared by one synchronous caller and
//! one asynchronous event consumer. Instead of locking the port, a single
//! task owns it and everyone else talks to that task through queues.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────── Intent (transmit/release/reset) ◄── Transaction
//!                    ▼
//! Transport ◄──► Reader Task ──► answers (Envelope) ──► Transaction
//!                    │
//!                    └─────────► events  (Envelope) ──► Dispatcher
//! ```
//!
//! The reader is the only producer into the answer and event queues. Each
//! envelope carries the reset epoch it was produced in, so consumers can drop
//! anything that predates the last reset.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::Result;
use crate::protocol::{to_hex, Frame, FrameReassembler};
use crate::router::{route, PendingRequest, Route};
use crate::transport::Transport;

/// Read buffer size; larger than any frame.
const READ_BUF_SIZE: usize = 256;

/// Stray bytes kept for inspection before the oldest are dropped.
const MAX_STRAY_KEPT: usize = 1024;

/// A request to the reader task.
#[derive(Debug)]
pub(crate) enum Intent {
    /// Install `request` as the pending request, then write its bytes.
    Transmit {
        request: PendingRequest,
        done: oneshot::Sender<io::Result<()>>,
    },
    /// Clear the pending request.
    Release,
    /// Reset the channel. Replies with the new epoch.
    Reset {
        reason: String,
        done: Option<oneshot::Sender<u64>>,
    },
    /// Stop the task.
    Shutdown,
}

/// A frame tagged with the reset epoch it was read in.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub epoch: u64,
    pub frame: Frame,
}

/// State shared between the reader task and its handles.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// Reset counter, used as the epoch.
    pub resets: AtomicU64,
    /// Stray bytes collected by the reassembler.
    pub stray: Mutex<Vec<u8>>,
}

impl SharedState {
    pub fn epoch(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }
}

/// Queue ends handed back to the engine when the reader is spawned.
pub(crate) struct ReaderChannels {
    pub intents: mpsc::UnboundedSender<Intent>,
    pub answers: mpsc::UnboundedReceiver<Envelope>,
    pub events: mpsc::UnboundedReceiver<Envelope>,
}

enum Step {
    Intent(Option<Intent>),
    Read(std::result::Result<io::Result<usize>, tokio::time::error::Elapsed>),
}

struct Reader<T> {
    transport: T,
    intents: mpsc::UnboundedReceiver<Intent>,
    answers: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedSender<Envelope>,
    reassembler: FrameReassembler,
    pending: Option<PendingRequest>,
    shared: Arc<SharedState>,
    read_timeout: Duration,
}

/// Spawn the reader task over `transport`.
///
/// Returns the queue ends and a join handle that completes when the
/// transport closes, fails, or a shutdown intent arrives.
pub(crate) fn spawn_reader<T: Transport>(
    transport: T,
    shared: Arc<SharedState>,
    read_timeout: Duration,
) -> (ReaderChannels, JoinHandle<Result<()>>) {
    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let (answer_tx, answer_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let reader = Reader {
        transport,
        intents: intent_rx,
        answers: answer_tx,
        events: event_tx,
        reassembler: FrameReassembler::new(),
        pending: None,
        shared,
        read_timeout,
    };

    let task = tokio::spawn(reader.run());

    (
        ReaderChannels {
            intents: intent_tx,
            answers: answer_rx,
            events: event_rx,
        },
        task,
    )
}

impl<T: Transport> Reader<T> {
    async fn run(mut self) -> Result<()> {
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            // Intents first so a transmit is never starved by a chatty line.
            let step = tokio::select! {
                biased;
                intent = self.intents.recv() => Step::Intent(intent),
                read = timeout(self.read_timeout, self.transport.read(&mut buf)) => Step::Read(read),
            };

            match step {
                Step::Intent(None) | Step::Intent(Some(Intent::Shutdown)) => {
                    tracing::debug!("Reader shutting down");
                    return Ok(());
                }
                Step::Intent(Some(intent)) => self.handle_intent(intent).await,
                Step::Read(Ok(Ok(0))) => {
                    tracing::warn!("Gateway channel closed");
                    return Ok(());
                }
                Step::Read(Ok(Ok(n))) => self.handle_bytes(&buf[..n]),
                Step::Read(Ok(Err(e))) => {
                    tracing::error!("Gateway read error: {}", e);
                    return Err(e.into());
                }
                Step::Read(Err(_)) => {
                    if self.reassembler.on_silence() {
                        self.reset("partial frame stalled");
                    }
                }
            }
        }
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Transmit { request, done } => {
                let result = self.transmit(request).await;
                if let Err(e) = &result {
                    tracing::error!("Gateway write error: {}", e);
                }
                let _ = done.send(result);
            }
            Intent::Release => {
                self.pending = None;
                self.reassembler.set_length_hint(None);
            }
            Intent::Reset { reason, done } => {
                let epoch = self.reset(&reason);
                if let Some(done) = done {
                    let _ = done.send(epoch);
                }
            }
            Intent::Shutdown => {}
        }
    }

    async fn transmit(&mut self, request: PendingRequest) -> io::Result<()> {
        tracing::debug!("TX {}", to_hex(request.bytes()));
        self.reassembler.set_length_hint(request.length_hint());
        let bytes = request.bytes().clone();
        self.pending = Some(request);
        self.transport.write_all(&bytes).await?;
        self.transport.flush().await
    }

    fn handle_bytes(&mut self, data: &[u8]) {
        let frames = self.reassembler.push(data);
        self.keep_stray();

        let epoch = self.shared.epoch();
        for frame in frames {
            tracing::debug!("RX {}", frame);
            let envelope = Envelope { epoch, frame };
            match route(&envelope.frame, self.pending.as_ref()) {
                Route::Answer => {
                    let _ = self.answers.send(envelope);
                }
                Route::Event => {
                    let _ = self.events.send(envelope);
                }
                Route::Unexpected => {
                    tracing::warn!("Unexpected message discarded: {}", envelope.frame);
                }
            }
        }
    }

    fn keep_stray(&mut self) {
        let stray = self.reassembler.take_stray();
        if stray.is_empty() {
            return;
        }
        if let Ok(mut kept) = self.shared.stray.lock() {
            kept.extend_from_slice(&stray);
            let len = kept.len();
            if len > MAX_STRAY_KEPT {
                kept.drain(..len - MAX_STRAY_KEPT);
            }
        }
    }

    /// Drop all in-flight state and bump the epoch.
    fn reset(&mut self, reason: &str) -> u64 {
        self.pending = None;
        self.reassembler.clear();
        if let Err(e) = self.transport.discard_buffers() {
            tracing::warn!("Failed to discard channel buffers: {}", e);
        }
        let epoch = self.shared.resets.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!(epoch, "Gateway channel reset: {}", reason);
        epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::protocol::build_standard;
    use tokio::io::duplex;

    fn spawn_default() -> (ReaderChannels, Arc<SharedState>, tokio::io::DuplexStream) {
        let (ours, theirs) = duplex(1024);
        let shared = Arc::new(SharedState::default());
        let (channels, _task) = spawn_reader(ours, shared.clone(), Duration::from_secs(1));
        (channels, shared, theirs)
    }

    async fn transmit(channels: &ReaderChannels, bytes: Vec<u8>) {
        let (done, rx) = oneshot::channel();
        channels
            .intents
            .send(Intent::Transmit {
                request: PendingRequest::new(bytes, None),
                done,
            })
            .unwrap();
        rx.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_transmit_writes_bytes() {
        let (channels, _shared, mut gateway) = spawn_default();
        let msg = build_standard(Address::new(1, 2, 3), 0x0F, 0x19, 0x00);
        transmit(&channels, msg.clone()).await;

        let mut buf = vec![0u8; msg.len()];
        gateway.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, msg);
    }

    #[tokio::test]
    async fn test_echo_goes_to_answers() {
        let (mut channels, _shared, mut gateway) = spawn_default();
        let msg = build_standard(Address::new(1, 2, 3), 0x0F, 0x19, 0x00);
        transmit(&channels, msg.clone()).await;

        let mut echo = msg.clone();
        echo.push(0x06);
        gateway.write_all(&echo).await.unwrap();

        let envelope = channels.answers.recv().await.unwrap();
        assert_eq!(envelope.frame.as_bytes(), &echo[..]);
        assert_eq!(envelope.epoch, 0);
    }

    #[tokio::test]
    async fn test_unsolicited_goes_to_events() {
        let (mut channels, _shared, mut gateway) = spawn_default();
        let broadcast = [0x02, 0x50, 1, 2, 3, 0, 0, 1, 0xCF, 0x11, 0x00];
        gateway.write_all(&broadcast).await.unwrap();

        let envelope = channels.events.recv().await.unwrap();
        assert_eq!(envelope.frame.as_bytes(), &broadcast[..]);
    }

    #[tokio::test]
    async fn test_reset_bumps_epoch() {
        let (channels, shared, _gateway) = spawn_default();
        let (done, rx) = oneshot::channel();
        channels
            .intents
            .send(Intent::Reset {
                reason: "test".into(),
                done: Some(done),
            })
            .unwrap();
        assert_eq!(rx.await.unwrap(), 1);
        assert_eq!(shared.epoch(), 1);
    }

    #[tokio::test]
    async fn test_stray_bytes_are_kept() {
        let (mut channels, shared, mut gateway) = spawn_default();
        gateway
            .write_all(&[0xFF, 0xFE, 0x02, 0x50, 1, 2, 3, 0, 0, 1, 0xCF, 0x11, 0x00])
            .await
            .unwrap();
        channels.events.recv().await.unwrap();
        assert_eq!(*shared.stray.lock().unwrap(), vec![0xFF, 0xFE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_partial_frame_resets() {
        let (ours, mut gateway) = duplex(64);
        let shared = Arc::new(SharedState::default());
        let (_channels, _task) = spawn_reader(ours, shared.clone(), Duration::from_millis(100));

        gateway.write_all(&[0x02, 0x50, 0x12, 0x5F]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(shared.epoch(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(shared.epoch(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_task() {
        let (ours, _theirs) = duplex(64);
        let shared = Arc::new(SharedState::default());
        let (channels, task) = spawn_reader(ours, shared, Duration::from_secs(1));
        channels.intents.send(Intent::Shutdown).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_channel_close_ends_task() {
        let (ours, theirs) = duplex(64);
        let shared = Arc::new(SharedState::default());
        let (_channels, task) = spawn_reader(ours, shared, Duration::from_secs(1));
        drop(theirs);
        assert!(task.await.unwrap().is_ok());
    }
}
