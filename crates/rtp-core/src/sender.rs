//! Paced RTP sender.
//!
//! Reads fixed-size chunks from an [`AudioSource`], wraps each in an RTP
//! packet and sends it to the current destination. In paced mode departures
//! follow the wall clock derived from the codec byte rate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::audio::AudioSource;
use crate::error::Error;
use crate::packet::RtpPacket;
use crate::stream::{StreamState, StreamStateCell};
use crate::transport::TransportHandle;
use crate::{Result, RtpSequenceNumber, RtpSsrc, DEFAULT_MAX_PACKET_SIZE};

/// Configuration for an [`RtpSender`]
#[derive(Debug, Clone)]
pub struct RtpSenderConfig {
    /// RTP payload type stamped on every packet
    pub payload_type: u8,
    /// Codec frames per second
    pub frame_rate: u32,
    /// Bytes per codec frame
    pub frame_size: u32,
    /// Payload bytes read from the source per packet
    pub packet_size: usize,
    /// Pace departures against the wall clock
    pub sync: bool,
    /// Subtracted from every paced sleep to compensate downstream latency
    pub sync_adjustment: Duration,
    /// Fixed SSRC; random when unset
    pub ssrc: Option<RtpSsrc>,
}

impl Default for RtpSenderConfig {
    fn default() -> Self {
        Self {
            payload_type: 0,
            frame_rate: 8000,
            frame_size: 1,
            packet_size: 160,
            sync: true,
            sync_adjustment: Duration::ZERO,
            ssrc: None,
        }
    }
}

impl RtpSenderConfig {
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_frame(mut self, frame_rate: u32, frame_size: u32) -> Self {
        self.frame_rate = frame_rate;
        self.frame_size = frame_size;
        self
    }

    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_sync_adjustment(mut self, adjustment: Duration) -> Self {
        self.sync_adjustment = adjustment;
        self
    }

    pub fn with_ssrc(mut self, ssrc: RtpSsrc) -> Self {
        self.ssrc = Some(ssrc);
        self
    }

    /// Encoded bytes per second
    pub fn byte_rate(&self) -> u64 {
        self.frame_rate as u64 * self.frame_size as u64
    }

    /// Whether departures are clock paced
    pub fn is_paced(&self) -> bool {
        self.sync || !self.sync_adjustment.is_zero()
    }

    fn validate(&self) -> Result<()> {
        if self.byte_rate() == 0 {
            return Err(Error::InvalidParameter(format!(
                "frame rate {} x frame size {} gives no byte rate",
                self.frame_rate, self.frame_size
            )));
        }
        if self.packet_size == 0 || self.packet_size > DEFAULT_MAX_PACKET_SIZE {
            return Err(Error::InvalidParameter(format!(
                "packet size {} out of range",
                self.packet_size
            )));
        }
        if self.payload_type > 0x7F {
            return Err(Error::InvalidParameter(format!(
                "payload type {} out of range",
                self.payload_type
            )));
        }
        Ok(())
    }
}

/// Running totals for a sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpSenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub last_sequence: Option<RtpSequenceNumber>,
}

/// Single-flow RTP packetizer
pub struct RtpSender {
    config: RtpSenderConfig,
    ssrc: RtpSsrc,
    transport: TransportHandle,
    remote: Arc<RwLock<SocketAddr>>,
    state: Arc<StreamStateCell>,
    cancel: CancellationToken,
    source: Mutex<Option<Box<dyn AudioSource>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<RtpSenderStats>>,
}

impl RtpSender {
    /// Create a sender over an existing transport
    pub fn new(
        config: RtpSenderConfig,
        source: Box<dyn AudioSource>,
        transport: TransportHandle,
        remote: SocketAddr,
    ) -> Result<Self> {
        config.validate()?;
        let ssrc = config.ssrc.unwrap_or_else(rand::random);
        Ok(Self {
            config,
            ssrc,
            transport,
            remote: Arc::new(RwLock::new(remote)),
            state: Arc::new(StreamStateCell::new()),
            cancel: CancellationToken::new(),
            source: Mutex::new(Some(source)),
            task: Mutex::new(None),
            stats: Arc::new(Mutex::new(RtpSenderStats::default())),
        })
    }

    /// Create a sender on its own socket, closed when the sender halts
    pub async fn bind(
        config: RtpSenderConfig,
        source: Box<dyn AudioSource>,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<Self> {
        let transport = TransportHandle::bind_owned(local).await?;
        Self::new(config, source, transport, remote)
    }

    /// Start the send loop
    pub fn start(&self) -> Result<()> {
        if !self.state.try_start() {
            return Err(Error::InvalidState(format!(
                "sender is {}, cannot start",
                self.state.get()
            )));
        }
        let source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("audio source already consumed".into()))?;

        let send_loop = SendLoop {
            config: self.config.clone(),
            ssrc: self.ssrc,
            transport: self.transport.clone(),
            remote: self.remote.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            stats: self.stats.clone(),
        };

        info!(
            "Starting RTP sender ssrc={:08x} pt={} to {}",
            self.ssrc,
            self.config.payload_type,
            self.remote_address()
        );
        *self.task.lock() = Some(tokio::spawn(send_loop.run(source)));
        Ok(())
    }

    /// Request the loop to stop. Idempotent and callable from any task.
    pub fn halt(&self) {
        let previous = self.state.halt();
        self.cancel.cancel();
        match previous {
            StreamState::Idle => {
                debug!("RTP sender ssrc={:08x} halted before start", self.ssrc);
                self.source.lock().take();
                self.transport.release();
            }
            StreamState::Running => debug!("RTP sender ssrc={:08x} halt requested", self.ssrc),
            StreamState::Halted => {}
        }
    }

    /// Halt and wait for the loop to finish its cleanup
    pub async fn stop(&self) {
        self.halt();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("RTP sender task ended abnormally: {}", e);
            }
        }
    }

    /// Replace the destination for subsequent packets
    pub fn set_remote_address(&self, addr: SocketAddr) {
        let mut remote = self.remote.write();
        if *remote != addr {
            info!("RTP sender ssrc={:08x} retargeted {} -> {}", self.ssrc, *remote, addr);
            *remote = addr;
        }
    }

    /// Current destination
    pub fn remote_address(&self) -> SocketAddr {
        *self.remote.read()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.transport().local_addr()
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    pub fn stats(&self) -> RtpSenderStats {
        self.stats.lock().clone()
    }
}

impl Drop for RtpSender {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SendLoop {
    config: RtpSenderConfig,
    ssrc: RtpSsrc,
    transport: TransportHandle,
    remote: Arc<RwLock<SocketAddr>>,
    state: Arc<StreamStateCell>,
    cancel: CancellationToken,
    stats: Arc<Mutex<RtpSenderStats>>,
}

impl SendLoop {
    async fn run(self, mut source: Box<dyn AudioSource>) {
        match source.start().await {
            Ok(()) => self.send_frames(source.as_mut()).await,
            Err(e) => error!("RTP sender ssrc={:08x}: audio source failed to start: {}", self.ssrc, e),
        }

        self.state.halt();
        source.stop().await;
        self.transport.release();
        let stats = self.stats.lock().clone();
        info!(
            "RTP sender ssrc={:08x} halted after {} packets",
            self.ssrc, stats.packets_sent
        );
    }

    async fn send_frames(&self, source: &mut dyn AudioSource) {
        let byte_rate = self.config.byte_rate();
        let paced = self.config.is_paced();
        let mut buf = vec![0u8; self.config.packet_size];
        let mut sequence: RtpSequenceNumber = 0;
        let mut time_ms: u64 = 0;
        let start = Instant::now();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = source.read(&mut buf) => read,
            };
            let n = match read {
                Ok(0) => {
                    debug!("RTP sender ssrc={:08x}: end of audio source", self.ssrc);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("RTP sender ssrc={:08x}: audio read failed: {}", self.ssrc, e);
                    break;
                }
            };

            let frame_ms = n as u64 * 1000 / byte_rate;
            let packet = RtpPacket::new_with_payload(
                self.config.payload_type,
                sequence,
                time_ms as u32,
                self.ssrc,
                Bytes::copy_from_slice(&buf[..n]),
            );
            let bytes = match packet.serialize() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("RTP sender ssrc={:08x}: {}", self.ssrc, e);
                    break;
                }
            };

            // Copy the destination once so the whole packet goes to one address
            let dest = *self.remote.read();
            if let Err(e) = self.transport.transport().send_to(&bytes, dest).await {
                error!("RTP sender ssrc={:08x}: send to {} failed: {}", self.ssrc, dest, e);
                break;
            }
            trace!("sent seq={} ts={} len={} to {}", sequence, time_ms, n, dest);

            {
                let mut stats = self.stats.lock();
                stats.packets_sent += 1;
                stats.bytes_sent += n as u64;
                stats.last_sequence = Some(sequence);
            }

            sequence = sequence.wrapping_add(1);
            time_ms += frame_ms;

            if paced {
                let sleep_for = self.paced_sleep(start, time_ms, frame_ms);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
        }
    }

    /// `start + time - now - sync_adjustment`, never below half a frame
    fn paced_sleep(&self, start: Instant, time_ms: u64, frame_ms: u64) -> Duration {
        let target = start + Duration::from_millis(time_ms);
        let min = Duration::from_millis(frame_ms) / 2;
        target
            .checked_duration_since(Instant::now())
            .and_then(|d| d.checked_sub(self.config.sync_adjustment))
            .unwrap_or(Duration::ZERO)
            .max(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BufferSource, SilenceSource};
    use crate::transport::{DatagramTransport, UdpTransport};
    use tokio::net::UdpSocket;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn recv_packet(socket: &UdpSocket) -> RtpPacket {
        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for RTP")
            .unwrap();
        RtpPacket::parse(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_sequence_starts_at_zero_without_gaps() {
        let sink = UdpSocket::bind(localhost()).await.unwrap();
        let config = RtpSenderConfig::default().with_sync(false).with_payload_type(8);
        let sender = RtpSender::bind(
            config,
            Box::new(BufferSource::numbered_frames(10, 160)),
            localhost(),
            sink.local_addr().unwrap(),
        )
        .await
        .unwrap();
        sender.start().unwrap();

        for i in 0..10u16 {
            let packet = recv_packet(&sink).await;
            assert_eq!(packet.header.sequence_number, i);
            assert_eq!(packet.header.timestamp, i as u32 * 20);
            assert_eq!(packet.header.payload_type, 8);
            assert_eq!(packet.header.ssrc, sender.ssrc());
            assert_eq!(packet.payload.len(), 160);
            assert_eq!(packet.payload[0], i as u8);
        }

        sender.stop().await;
        assert_eq!(sender.state(), StreamState::Halted);
        let stats = sender.stats();
        assert_eq!(stats.packets_sent, 10);
        assert_eq!(stats.bytes_sent, 1600);
        assert_eq!(stats.last_sequence, Some(9));
    }

    #[tokio::test]
    async fn test_paced_mode_follows_clock() {
        let sink = UdpSocket::bind(localhost()).await.unwrap();
        let sender = RtpSender::bind(
            RtpSenderConfig::default(),
            Box::new(BufferSource::numbered_frames(5, 160)),
            localhost(),
            sink.local_addr().unwrap(),
        )
        .await
        .unwrap();
        sender.start().unwrap();

        recv_packet(&sink).await;
        let first = std::time::Instant::now();
        for _ in 1..5 {
            recv_packet(&sink).await;
        }
        // Four more 20 ms frames
        assert!(first.elapsed() >= Duration::from_millis(60));
        sender.stop().await;
    }

    #[tokio::test]
    async fn test_set_remote_address_retargets_next_packet() {
        let first = UdpSocket::bind(localhost()).await.unwrap();
        let second = UdpSocket::bind(localhost()).await.unwrap();
        let sender = RtpSender::bind(
            RtpSenderConfig::default(),
            Box::new(SilenceSource::new(0xFF)),
            localhost(),
            first.local_addr().unwrap(),
        )
        .await
        .unwrap();
        sender.start().unwrap();

        let before = recv_packet(&first).await;
        sender.set_remote_address(second.local_addr().unwrap());
        assert_eq!(sender.remote_address(), second.local_addr().unwrap());

        let after = recv_packet(&second).await;
        assert!(after.header.sequence_number > before.header.sequence_number);
        sender.stop().await;
    }

    #[tokio::test]
    async fn test_halt_is_prompt_and_idempotent() {
        let sink = UdpSocket::bind(localhost()).await.unwrap();
        // One byte per second: each paced sleep lasts over a minute
        let config = RtpSenderConfig::default().with_frame(1, 1).with_packet_size(160);
        let sender = RtpSender::bind(
            config,
            Box::new(SilenceSource::new(0xFF)),
            localhost(),
            sink.local_addr().unwrap(),
        )
        .await
        .unwrap();
        sender.start().unwrap();
        recv_packet(&sink).await;

        sender.halt();
        sender.halt();
        tokio::time::timeout(Duration::from_millis(500), sender.stop())
            .await
            .expect("sender did not observe halt");
        assert_eq!(sender.state(), StreamState::Halted);
        assert!(sender.start().is_err());
    }

    #[tokio::test]
    async fn test_socket_ownership() {
        let sink = UdpSocket::bind(localhost()).await.unwrap();
        let dest = sink.local_addr().unwrap();

        let owned = RtpSender::bind(
            RtpSenderConfig::default().with_sync(false),
            Box::new(BufferSource::numbered_frames(1, 160)),
            localhost(),
            dest,
        )
        .await
        .unwrap();
        let owned_transport = owned.transport.transport().clone();
        owned.start().unwrap();
        owned.stop().await;
        assert!(owned_transport.is_closed());

        let shared: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::bind(localhost()).await.unwrap());
        let borrowed = RtpSender::new(
            RtpSenderConfig::default().with_sync(false),
            Box::new(BufferSource::numbered_frames(1, 160)),
            TransportHandle::shared(shared.clone()),
            dest,
        )
        .unwrap();
        borrowed.start().unwrap();
        borrowed.stop().await;
        assert!(!shared.is_closed());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let transport: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::bind(localhost()).await.unwrap());
        let res = RtpSender::new(
            RtpSenderConfig::default().with_frame(0, 1),
            Box::new(SilenceSource::new(0)),
            TransportHandle::shared(transport),
            "127.0.0.1:9".parse().unwrap(),
        );
        assert!(matches!(res, Err(Error::InvalidParameter(_))));
    }
}
