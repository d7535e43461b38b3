//! Relay server
//!
//! One UDP socket serves both directions: listeners register and send
//! keepalives to it, and the dispatcher relays voice batches from it. Three
//! tasks share the registry: the receive loop, the eviction sweep and the
//! dispatcher. None of them holds the registry lock while sending.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::{MAX_DATAGRAM_SIZE, MAX_RECV_SIZE};
use crate::error::Error;
use crate::network::udp::create_socket;
use crate::protocol::{BatchBuilder, VoiceFrame};
use crate::registry::{unix_now, ClientRegistry};

/// Frames drained from the capture channel into one round of datagrams
const MAX_FRAMES_PER_ROUND: usize = 64;

/// Capacity of the capture to dispatcher channel
const VOICE_CHANNEL_CAPACITY: usize = 1024;

/// Relay counters
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_relayed: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Snapshot of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub frames_relayed: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Bound relay socket and listener registry, not yet running
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    registry: Arc<ClientRegistry>,
    sweep_interval: Duration,
    stats: Arc<RelayStats>,
}

impl RelayServer {
    /// Bind the relay socket. Failure here is fatal to the server.
    pub fn bind(addr: SocketAddr, password: &str, sweep_interval: Duration) -> Result<Self, Error> {
        let registry = Arc::new(ClientRegistry::new(password)?);
        let socket = create_socket(addr)?;

        Ok(Self {
            socket: Arc::new(socket),
            registry,
            sweep_interval,
            stats: Arc::new(RelayStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Start the receive loop, the eviction sweep and the dispatcher
    pub fn spawn(self) -> RelayHandle {
        let (voice_tx, voice_rx) = mpsc::channel(VOICE_CHANNEL_CAPACITY);
        let local_addr = self.socket.local_addr().ok();

        let receive = tokio::spawn(receive_loop(self.socket.clone(), self.registry.clone()));
        let sweep = tokio::spawn(sweep_loop(self.registry.clone(), self.sweep_interval));
        let dispatcher = RelayDispatcher {
            socket: self.socket.clone(),
            registry: self.registry.clone(),
            frames: voice_rx,
            stats: self.stats.clone(),
        };
        let dispatch = tokio::spawn(dispatcher.run());

        if let Some(addr) = local_addr {
            tracing::info!("Relay server running on {}", addr);
        }

        RelayHandle {
            voice_tx,
            registry: self.registry,
            stats: self.stats,
            local_addr,
            tasks: vec![receive, sweep, dispatch],
        }
    }
}

/// Running relay server
pub struct RelayHandle {
    voice_tx: mpsc::Sender<VoiceFrame>,
    registry: Arc<ClientRegistry>,
    stats: Arc<RelayStats>,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Channel the capture source feeds voice frames into
    pub fn voice_sender(&self) -> mpsc::Sender<VoiceFrame> {
        self.voice_tx.clone()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop every relay task
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Relay server stopped");
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, registry: Arc<ClientRegistry>) {
    let mut buf = vec![0u8; MAX_RECV_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                registry.handle_datagram(from, &buf[..len], unix_now());
            }
            Err(e) => {
                // ICMP errors from gone listeners surface here on some platforms
                tracing::debug!("Relay receive error: {}", e);
            }
        }
    }
}

async fn sweep_loop(registry: Arc<ClientRegistry>, period: Duration) {
    let threshold = period.as_secs();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        registry.sweep_expired(unix_now(), threshold);
    }
}

/// Relays voice frames from the capture source to every listener
pub struct RelayDispatcher {
    socket: Arc<UdpSocket>,
    registry: Arc<ClientRegistry>,
    frames: mpsc::Receiver<VoiceFrame>,
    stats: Arc<RelayStats>,
}

impl RelayDispatcher {
    async fn run(mut self) {
        while let Some(frame) = self.frames.recv().await {
            let mut batch = BatchBuilder::new(MAX_DATAGRAM_SIZE);
            let mut count = 0u64;

            self.push(&mut batch, &frame, &mut count);
            while (count as usize) < MAX_FRAMES_PER_ROUND {
                match self.frames.try_recv() {
                    Ok(frame) => self.push(&mut batch, &frame, &mut count),
                    Err(_) => break,
                }
            }

            if batch.is_empty() {
                continue;
            }
            self.stats.frames_relayed.fetch_add(count, Ordering::Relaxed);

            // Snapshot taken under the lock, sends happen after it is released
            let listeners = self.registry.listeners();
            for datagram in batch.finish() {
                for listener in &listeners {
                    self.send(&datagram, *listener).await;
                }
            }
        }

        tracing::info!("Voice source closed, dispatcher exiting");
    }

    fn push(&self, batch: &mut BatchBuilder, frame: &VoiceFrame, count: &mut u64) {
        match batch.push(frame) {
            Ok(()) => *count += 1,
            Err(e) => tracing::warn!("Dropping frame of session {}: {}", frame.session_id, e),
        }
    }

    async fn send(&self, datagram: &[u8], to: SocketAddr) {
        match self.socket.send_to(datagram, to).await {
            Ok(sent) => {
                self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Send to {} failed: {}", to, e);
            }
        }
    }
}
