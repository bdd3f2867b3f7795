//! UDP relay: forwards every datagram received on a local port to a fixed
//! destination, halting itself once the source has been idle long enough.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::transport::TransportHandle;
use crate::{Result, DEFAULT_MAX_PACKET_SIZE};

/// Default bound on a single blocking receive
pub const DEFAULT_RELAY_RECV_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default idle period after which the relay halts itself
pub const DEFAULT_RELAY_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for a [`UdpRelay`]
#[derive(Debug, Clone)]
pub struct UdpRelayConfig {
    /// Local address to bind
    pub local_addr: SocketAddr,
    /// Where every datagram is forwarded
    pub destination: SocketAddr,
    /// Upper bound on one receive call
    pub recv_timeout: Duration,
    /// Halt after this long without traffic; `None` relays until halted
    pub idle_timeout: Option<Duration>,
    /// Receive buffer size
    pub buffer_size: usize,
}

impl UdpRelayConfig {
    pub fn new(local_addr: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            local_addr,
            destination,
            recv_timeout: DEFAULT_RELAY_RECV_TIMEOUT,
            idle_timeout: Some(DEFAULT_RELAY_IDLE_TIMEOUT),
            buffer_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Time allowed since the last receive before the relay gives up
    fn alive_window(&self) -> Option<Duration> {
        self.idle_timeout
            .map(|idle| idle.saturating_sub(self.recv_timeout))
    }
}

/// Notifications raised by a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Datagrams now arrive from a different address
    SourceChanged { addr: SocketAddr },
    /// The relay has stopped
    Terminated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpRelayStats {
    pub packets_relayed: u64,
    pub bytes_relayed: u64,
    pub send_errors: u64,
}

/// Single-destination datagram relay
pub struct UdpRelay {
    inner: Arc<RelayInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct RelayInner {
    config: UdpRelayConfig,
    transport: TransportHandle,
    listener: Option<mpsc::UnboundedSender<RelayEvent>>,
    source: Mutex<Option<SocketAddr>>,
    stats: Mutex<UdpRelayStats>,
    cancel: CancellationToken,
    terminated: AtomicBool,
}

impl UdpRelay {
    /// Bind `config.local_addr` and start relaying
    pub async fn start(
        config: UdpRelayConfig,
        listener: Option<mpsc::UnboundedSender<RelayEvent>>,
    ) -> Result<Self> {
        let transport = TransportHandle::bind_owned(config.local_addr).await?;
        Ok(Self::with_transport(config, transport, listener))
    }

    /// Start relaying over an existing transport
    pub fn with_transport(
        config: UdpRelayConfig,
        transport: TransportHandle,
        listener: Option<mpsc::UnboundedSender<RelayEvent>>,
    ) -> Self {
        let inner = Arc::new(RelayInner {
            config,
            transport,
            listener,
            source: Mutex::new(None),
            stats: Mutex::new(UdpRelayStats::default()),
            cancel: CancellationToken::new(),
            terminated: AtomicBool::new(false),
        });

        info!(
            "Starting UDP relay {:?} -> {}",
            inner.transport.transport().local_addr().ok(),
            inner.config.destination
        );
        let task = tokio::spawn(inner.clone().run());
        Self { inner, task: Mutex::new(Some(task)) }
    }

    /// Stop relaying. Idempotent.
    pub fn halt(&self) {
        self.inner.terminate();
    }

    /// Halt and wait for the relay task to exit
    pub async fn stop(&self) {
        self.halt();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("UDP relay task ended abnormally: {}", e);
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.transport.transport().local_addr()
    }

    pub fn destination(&self) -> SocketAddr {
        self.inner.config.destination
    }

    /// Last address datagrams arrived from
    pub fn source(&self) -> Option<SocketAddr> {
        *self.inner.source.lock()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> UdpRelayStats {
        self.inner.stats.lock().clone()
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.inner.terminate();
    }
}

impl RelayInner {
    async fn run(self: Arc<Self>) {
        let transport = self.transport.transport().clone();
        let mut buf = vec![0u8; self.config.buffer_size];
        let alive_window = self.config.alive_window();
        let mut alive_until = alive_window.map(|w| Instant::now() + w);

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(self.config.recv_timeout, transport.recv_from(&mut buf)) => res,
            };

            match received {
                Err(_) => {
                    if alive_until.is_some_and(|deadline| Instant::now() >= deadline) {
                        info!(
                            "UDP relay to {} idle, halting",
                            self.config.destination
                        );
                        break;
                    }
                }
                Ok(Ok((n, source))) => {
                    if let Some(window) = alive_window {
                        alive_until = Some(Instant::now() + window);
                    }
                    self.track_source(source);
                    self.forward(&buf[..n]).await;
                }
                Ok(Err(e)) => {
                    if !self.cancel.is_cancelled() {
                        error!("UDP relay: receive failed: {}", e);
                    }
                    break;
                }
            }
        }

        self.terminate();
    }

    async fn forward(&self, datagram: &[u8]) {
        let destination = self.config.destination;
        match self.transport.transport().send_to(datagram, destination).await {
            Ok(sent) => {
                trace!("relayed {} bytes to {}", sent, destination);
                let mut stats = self.stats.lock();
                stats.packets_relayed += 1;
                stats.bytes_relayed += sent as u64;
            }
            Err(e) => {
                debug!("UDP relay: send to {} failed: {}", destination, e);
                self.stats.lock().send_errors += 1;
            }
        }
    }

    fn track_source(&self, source: SocketAddr) {
        let changed = {
            let mut current = self.source.lock();
            let changed = *current != Some(source);
            *current = Some(source);
            changed
        };
        if changed {
            info!("UDP relay: source changed to {}", source);
            self.notify(RelayEvent::SourceChanged { addr: source });
        }
    }

    /// Close the socket and report termination, once
    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.transport.release();
        self.notify(RelayEvent::Terminated);
        debug!("UDP relay to {} terminated", self.config.destination);
    }

    fn notify(&self, event: RelayEvent) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_relays_and_reports_source() {
        let target = UdpSocket::bind(localhost()).await.unwrap();
        let (tx, mut events) = mpsc::unbounded_channel();
        let relay = UdpRelay::start(
            UdpRelayConfig::new(localhost(), target.local_addr().unwrap()),
            Some(tx),
        )
        .await
        .unwrap();
        let relay_addr = relay.local_addr().unwrap();

        let peer = UdpSocket::bind(localhost()).await.unwrap();
        peer.send_to(b"one", relay_addr).await.unwrap();
        peer.send_to(b"two", relay_addr).await.unwrap();

        let mut buf = [0u8; 16];
        for expected in [&b"one"[..], &b"two"[..]] {
            let (n, from) = tokio::time::timeout(Duration::from_secs(1), target.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..n], expected);
            assert_eq!(from, relay_addr);
        }

        assert_eq!(
            events.recv().await,
            Some(RelayEvent::SourceChanged { addr: peer.local_addr().unwrap() })
        );
        assert_eq!(relay.source(), Some(peer.local_addr().unwrap()));

        relay.stop().await;
        relay.halt();
        assert!(!relay.is_running());
        assert_eq!(events.recv().await, Some(RelayEvent::Terminated));
        drop(relay);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_halt_closes_socket() {
        let relay = UdpRelay::start(UdpRelayConfig::new(localhost(), "127.0.0.1:9".parse().unwrap()), None)
            .await
            .unwrap();
        let transport = relay.inner.transport.transport().clone();
        tokio::time::timeout(Duration::from_millis(500), relay.stop())
            .await
            .expect("relay did not observe halt");
        assert!(transport.is_closed());
    }

    #[test]
    fn test_alive_window() {
        let config = UdpRelayConfig::new(localhost(), localhost());
        assert_eq!(config.alive_window(), Some(Duration::from_secs(57)));
        assert_eq!(config.with_idle_timeout(None).alive_window(), None);
    }
}
