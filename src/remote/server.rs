//! UDP command server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

use super::command::{RemoteCommand, RemoteReply};
use crate::codec::WireCodec;
use crate::error::{InsteonError, Result};
use crate::modem::Modem;
use crate::scheduler::Scheduler;

/// Default UDP port.
pub const DEFAULT_REMOTE_PORT: u16 = 52006;

/// Default number of commands handled at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Remote server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub bind: SocketAddr,
    pub codec: WireCodec,
    pub max_concurrent: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_REMOTE_PORT)),
            codec: WireCodec::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Receives one command per datagram and answers the sender.
pub struct RemoteServer {
    socket: Arc<UdpSocket>,
    codec: WireCodec,
    modem: Modem,
    scheduler: Arc<Scheduler>,
    permits: Arc<Semaphore>,
}

impl RemoteServer {
    /// Bind the socket.
    pub async fn bind(config: &RemoteConfig, modem: Modem, scheduler: Arc<Scheduler>) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind).await.map_err(|e| {
            InsteonError::ChannelUnavailable(format!("Cannot bind {}: {}", config.bind, e))
        })?;
        tracing::info!("Remote commands on udp://{} ({:?})", config.bind, config.codec);
        Ok(Self {
            socket: Arc::new(socket),
            codec: config.codec,
            modem,
            scheduler,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until `shutdown` completes.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::pin!(shutdown);

        loop {
            let (n, peer) = tokio::select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => received?,
            };
            self.dispatch(&buf[..n], peer).await;
        }
        tracing::debug!("Remote server stopped");
        Ok(())
    }

    async fn dispatch(&self, datagram: &[u8], peer: SocketAddr) {
        let command: RemoteCommand = match self.codec.decode(datagram) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Rejected datagram from {}: {}", peer, e);
                self.reply(peer, RemoteReply::failure(e)).await;
                return;
            }
        };

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("Command capacity reached, rejecting {:?} from {}", command, peer);
                self.reply(peer, RemoteReply::failure("busy")).await;
                return;
            }
        };

        tracing::debug!("{} -> {:?}", peer, command);
        let socket = self.socket.clone();
        let codec = self.codec;
        let modem = self.modem.clone();
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let reply = RemoteReply::from(command.execute(&modem, &scheduler).await);
            send_reply(&socket, codec, peer, &reply).await;
        });
    }

    async fn reply(&self, peer: SocketAddr, reply: RemoteReply) {
        send_reply(&self.socket, self.codec, peer, &reply).await;
    }
}

async fn send_reply(socket: &UdpSocket, codec: WireCodec, peer: SocketAddr, reply: &RemoteReply) {
    let bytes = match codec.encode(reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Cannot encode reply to {}: {}", peer, e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, peer).await {
        tracing::warn!("Reply to {} failed: {}", peer, e);
    }
}
