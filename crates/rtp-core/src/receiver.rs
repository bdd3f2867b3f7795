//! RTP receiver: socket-bound depacketizer feeding an [`AudioSink`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::audio::AudioSink;
use crate::error::Error;
use crate::packet::RtpPacket;
use crate::stream::{StreamState, StreamStateCell};
use crate::transport::TransportHandle;
use crate::{Result, RtpSequenceNumber, DEFAULT_MAX_PACKET_SIZE};

/// Default window after start during which packets are discarded
pub const DEFAULT_EARLY_DROP: Duration = Duration::from_millis(200);

/// Default bound on a single blocking receive
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Configuration for an [`RtpReceiver`]
#[derive(Debug, Clone)]
pub struct RtpReceiverConfig {
    /// Packets received this soon after start never reach the sink
    pub early_drop: Duration,
    /// Upper bound on one receive call
    pub recv_timeout: Duration,
    /// Drop every Nth packet after the early-drop window; 0 disables
    pub red_rate: u32,
    /// Receive buffer size
    pub buffer_size: usize,
    /// Remote address the flow expects packets from, if known
    pub expected_remote: Option<SocketAddr>,
}

impl Default for RtpReceiverConfig {
    fn default() -> Self {
        Self {
            early_drop: DEFAULT_EARLY_DROP,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            red_rate: 0,
            buffer_size: DEFAULT_MAX_PACKET_SIZE,
            expected_remote: None,
        }
    }
}

impl RtpReceiverConfig {
    pub fn with_early_drop(mut self, early_drop: Duration) -> Self {
        self.early_drop = early_drop;
        self
    }

    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    pub fn with_red_rate(mut self, red_rate: u32) -> Self {
        self.red_rate = red_rate;
        self
    }

    pub fn with_expected_remote(mut self, remote: SocketAddr) -> Self {
        self.expected_remote = Some(remote);
        self
    }
}

/// Notifications raised by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Packets now arrive from a different address
    RemoteAddressChanged { addr: SocketAddr },
    /// The receive loop has exited
    Terminated,
}

/// Running totals for a receiver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpReceiverStats {
    pub packets_received: u64,
    pub packets_dropped_early: u64,
    pub packets_dropped_red: u64,
    pub packets_invalid: u64,
    pub bytes_written: u64,
    pub first_sequence: Option<RtpSequenceNumber>,
    pub highest_sequence: Option<RtpSequenceNumber>,
    /// Packets whose sequence number did not follow the previous one
    pub sequence_discontinuities: u64,
}

impl RtpReceiverStats {
    fn track_sequence(&mut self, seq: RtpSequenceNumber) {
        match self.highest_sequence {
            None => self.first_sequence = Some(seq),
            Some(prev) if prev.wrapping_add(1) != seq => self.sequence_discontinuities += 1,
            Some(_) => {}
        }
        self.highest_sequence = Some(seq);
    }
}

/// Socket-bound RTP depacketizer
pub struct RtpReceiver {
    config: RtpReceiverConfig,
    transport: TransportHandle,
    sink: Arc<dyn AudioSink>,
    listener: Option<mpsc::UnboundedSender<ReceiverEvent>>,
    remote: Arc<Mutex<Option<SocketAddr>>>,
    state: Arc<StreamStateCell>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<RtpReceiverStats>>,
}

impl RtpReceiver {
    /// Create a receiver over an existing transport
    pub fn new(
        config: RtpReceiverConfig,
        transport: TransportHandle,
        sink: Arc<dyn AudioSink>,
        listener: Option<mpsc::UnboundedSender<ReceiverEvent>>,
    ) -> Self {
        let remote = config.expected_remote;
        Self {
            config,
            transport,
            sink,
            listener,
            remote: Arc::new(Mutex::new(remote)),
            state: Arc::new(StreamStateCell::new()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            stats: Arc::new(Mutex::new(RtpReceiverStats::default())),
        }
    }

    /// Create a receiver on its own socket, closed when the receiver halts
    pub async fn bind(
        config: RtpReceiverConfig,
        local: SocketAddr,
        sink: Arc<dyn AudioSink>,
        listener: Option<mpsc::UnboundedSender<ReceiverEvent>>,
    ) -> Result<Self> {
        let transport = TransportHandle::bind_owned(local).await?;
        Ok(Self::new(config, transport, sink, listener))
    }

    /// Start playback and the receive loop
    pub fn start(&self) -> Result<()> {
        if !self.state.try_start() {
            return Err(Error::InvalidState(format!(
                "receiver is {}, cannot start",
                self.state.get()
            )));
        }

        let recv_loop = RecvLoop {
            config: self.config.clone(),
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            listener: self.listener.clone(),
            remote: self.remote.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            stats: self.stats.clone(),
        };

        self.sink.play();
        info!("Starting RTP receiver on {:?}", self.local_addr().ok());
        *self.task.lock() = Some(tokio::spawn(recv_loop.run()));
        Ok(())
    }

    /// Stop playback, then release the receive loop. Idempotent.
    pub fn halt(&self) {
        let previous = self.state.halt();
        if previous == StreamState::Halted {
            return;
        }
        self.sink.stop();
        self.cancel.cancel();
        if previous == StreamState::Idle {
            debug!("RTP receiver halted before start");
            self.transport.release();
        }
    }

    /// Halt and wait for the loop to finish its cleanup
    pub async fn stop(&self) {
        self.halt();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("RTP receiver task ended abnormally: {}", e);
            }
        }
    }

    /// Last address packets arrived from
    pub fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.transport().local_addr()
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn stats(&self) -> RtpReceiverStats {
        self.stats.lock().clone()
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RecvLoop {
    config: RtpReceiverConfig,
    transport: TransportHandle,
    sink: Arc<dyn AudioSink>,
    listener: Option<mpsc::UnboundedSender<ReceiverEvent>>,
    remote: Arc<Mutex<Option<SocketAddr>>>,
    state: Arc<StreamStateCell>,
    cancel: CancellationToken,
    stats: Arc<Mutex<RtpReceiverStats>>,
}

impl RecvLoop {
    async fn run(self) {
        self.receive_packets().await;

        self.state.halt();
        self.sink.stop();
        self.transport.release();
        self.notify(ReceiverEvent::Terminated);
        let stats = self.stats.lock().clone();
        info!(
            "RTP receiver halted: {} received, {} dropped early, {} dropped by RED",
            stats.packets_received, stats.packets_dropped_early, stats.packets_dropped_red
        );
    }

    async fn receive_packets(&self) {
        let transport = self.transport.transport().clone();
        let mut buf = vec![0u8; self.config.buffer_size];
        let early_drop_until = Instant::now() + self.config.early_drop;
        let mut red_counter: u32 = 0;

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(self.config.recv_timeout, transport.recv_from(&mut buf)) => res,
            };

            let (n, source) = match received {
                // Timeouts only bound the wait; keep looping
                Err(_) => continue,
                Ok(Ok(res)) => res,
                Ok(Err(e)) => {
                    if !self.cancel.is_cancelled() {
                        error!("RTP receiver: receive failed: {}", e);
                    }
                    break;
                }
            };

            let packet = match RtpPacket::parse(&buf[..n]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Ignoring non-RTP datagram from {}: {}", source, e);
                    self.stats.lock().packets_invalid += 1;
                    continue;
                }
            };

            self.track_source(source);
            {
                let mut stats = self.stats.lock();
                stats.packets_received += 1;
                stats.track_sequence(packet.header.sequence_number);
            }

            if Instant::now() < early_drop_until {
                trace!("early drop seq={}", packet.header.sequence_number);
                self.stats.lock().packets_dropped_early += 1;
                continue;
            }

            if self.config.red_rate > 0 {
                red_counter += 1;
                if red_counter % self.config.red_rate == 0 {
                    trace!("RED drop seq={}", packet.header.sequence_number);
                    self.stats.lock().packets_dropped_red += 1;
                    continue;
                }
            }

            match self.sink.write(&packet.payload).await {
                Ok(written) => self.stats.lock().bytes_written += written as u64,
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        error!("RTP receiver: sink write failed: {}", e);
                    }
                    break;
                }
            }
        }
    }

    fn track_source(&self, source: SocketAddr) {
        let changed = {
            let mut remote = self.remote.lock();
            if *remote != Some(source) {
                *remote = Some(source);
                true
            } else {
                false
            }
        };
        if changed {
            info!("RTP receiver: remote address changed to {}", source);
            self.notify(ReceiverEvent::RemoteAddressChanged { addr: source });
        }
    }

    fn notify(&self, event: ReceiverEvent) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChannelSink, NullSink};
    use crate::transport::{DatagramTransport, UdpTransport};
    use bytes::Bytes;
    use tokio::net::UdpSocket;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn rtp(seq: u16, fill: u8) -> Bytes {
        RtpPacket::new_with_payload(0, seq, seq as u32 * 160, 7, Bytes::from(vec![fill; 160]))
            .serialize()
            .unwrap()
    }

    #[tokio::test]
    async fn test_early_drop_then_in_order_delivery() {
        let (sink, mut rx) = ChannelSink::new();
        let receiver = RtpReceiver::bind(
            RtpReceiverConfig::default().with_early_drop(Duration::from_millis(150)),
            localhost(),
            Arc::new(sink),
            None,
        )
        .await
        .unwrap();
        let dest = receiver.local_addr().unwrap();
        receiver.start().unwrap();

        let peer = UdpSocket::bind(localhost()).await.unwrap();
        for seq in 0..3u16 {
            peer.send_to(&rtp(seq, 0xEE), dest).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        for seq in 3..6u16 {
            peer.send_to(&rtp(seq, seq as u8), dest).await.unwrap();
        }

        for expected in 3..6u8 {
            let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(payload[0], expected);
        }

        receiver.stop().await;
        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 6);
        assert_eq!(stats.packets_dropped_early, 3);
        assert_eq!(stats.first_sequence, Some(0));
        assert_eq!(stats.highest_sequence, Some(5));
        assert_eq!(stats.sequence_discontinuities, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_red_drops_every_nth_packet() {
        let sink = Arc::new(NullSink::new());
        let receiver = RtpReceiver::bind(
            RtpReceiverConfig::default().with_early_drop(Duration::ZERO).with_red_rate(3),
            localhost(),
            sink.clone(),
            None,
        )
        .await
        .unwrap();
        let dest = receiver.local_addr().unwrap();
        receiver.start().unwrap();

        let peer = UdpSocket::bind(localhost()).await.unwrap();
        for seq in 0..9u16 {
            peer.send_to(&rtp(seq, 1), dest).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while receiver.stats().packets_received < 9 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        receiver.stop().await;
        let stats = receiver.stats();
        assert_eq!(stats.packets_dropped_red, 3);
        assert_eq!(sink.bytes_written(), 6 * 160);
    }

    #[tokio::test]
    async fn test_address_change_notification() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let first = UdpSocket::bind(localhost()).await.unwrap();
        let second = UdpSocket::bind(localhost()).await.unwrap();
        let receiver = RtpReceiver::bind(
            RtpReceiverConfig::default()
                .with_early_drop(Duration::ZERO)
                .with_expected_remote(first.local_addr().unwrap()),
            localhost(),
            Arc::new(NullSink::new()),
            Some(tx),
        )
        .await
        .unwrap();
        let dest = receiver.local_addr().unwrap();
        receiver.start().unwrap();

        // Matches the expected remote: no event
        first.send_to(&rtp(0, 0), dest).await.unwrap();
        second.send_to(&rtp(1, 0), dest).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            ReceiverEvent::RemoteAddressChanged { addr: second.local_addr().unwrap() }
        );
        assert_eq!(receiver.remote_address(), Some(second.local_addr().unwrap()));

        receiver.stop().await;
        assert_eq!(events.recv().await, Some(ReceiverEvent::Terminated));
    }

    #[tokio::test]
    async fn test_halt_stops_sink_and_is_prompt() {
        let (sink, _rx) = ChannelSink::new();
        let sink = Arc::new(sink);
        let receiver = RtpReceiver::bind(
            RtpReceiverConfig::default().with_recv_timeout(Duration::from_secs(30)),
            localhost(),
            sink.clone(),
            None,
        )
        .await
        .unwrap();
        let transport = receiver.transport.transport().clone();
        receiver.start().unwrap();
        assert!(sink.is_playing());

        receiver.halt();
        assert!(!sink.is_playing());
        receiver.halt();
        tokio::time::timeout(Duration::from_millis(500), receiver.stop())
            .await
            .expect("receiver did not observe halt");
        assert_eq!(receiver.state(), StreamState::Halted);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_shared_transport_left_open() {
        let shared: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::bind(localhost()).await.unwrap());
        let receiver = RtpReceiver::new(
            RtpReceiverConfig::default(),
            TransportHandle::shared(shared.clone()),
            Arc::new(NullSink::new()),
            None,
        );
        receiver.start().unwrap();
        receiver.stop().await;
        assert!(!shared.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_datagrams_are_skipped() {
        let sink = Arc::new(NullSink::new());
        let receiver = RtpReceiver::bind(
            RtpReceiverConfig::default().with_early_drop(Duration::ZERO),
            localhost(),
            sink.clone(),
            None,
        )
        .await
        .unwrap();
        let dest = receiver.local_addr().unwrap();
        receiver.start().unwrap();

        let peer = UdpSocket::bind(localhost()).await.unwrap();
        peer.send_to(b"not rtp", dest).await.unwrap();
        peer.send_to(&rtp(0, 1), dest).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.bytes_written() < 160 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        receiver.stop().await;
        assert_eq!(receiver.stats().packets_invalid, 1);
    }
}
