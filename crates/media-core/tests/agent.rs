//! Media agent flows against plain UDP peers on loopback.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sippin_codec_core::{CodecCatalog, CodecDescriptor, CodecOverrides};
use sippin_media_core::prelude::*;
use sippin_media_core::{AudioDeviceFactory, SilentDeviceFactory};
use sippin_rtp_core::{AudioSink, AudioSource, NullSink, RtpPacket, SilenceSource};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn loopback() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn pcmu() -> CodecDescriptor {
    CodecCatalog::standard().resolve("PCMU", &CodecOverrides::none())
}

fn config() -> MediaAgentConfig {
    MediaAgentConfig::default()
        .with_bind_addr(loopback())
        .with_early_drop_ms(0)
}

fn flow(kind: &str, remote: SocketAddr, direction: Direction) -> FlowSpec {
    FlowSpec {
        kind: kind.to_string(),
        codec: pcmu(),
        local_port: 0,
        remote_addr: remote.ip(),
        remote_port: remote.port(),
        direction,
    }
}

async fn peer() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_rtp(socket: &UdpSocket) -> RtpPacket {
    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for RTP")
        .unwrap();
    RtpPacket::parse(&buf[..n]).unwrap()
}

fn rtp(seq: u16) -> Bytes {
    RtpPacket::new_with_payload(0, seq, seq as u32 * 160, 0x5151, Bytes::from(vec![0x7Fu8; 160]))
        .serialize()
        .unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<MediaEvent>) -> MediaEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for media event")
        .unwrap()
}

/// Silence in, byte counter out
struct CountingDevices {
    sink: Arc<NullSink>,
}

#[async_trait]
impl AudioDeviceFactory for CountingDevices {
    async fn open_source(&self, codec: &CodecDescriptor) -> sippin_media_core::Result<Box<dyn AudioSource>> {
        Ok(Box::new(SilenceSource::new(SilentDeviceFactory::silence_byte(codec.kind))))
    }

    async fn open_sink(&self, _codec: &CodecDescriptor) -> sippin_media_core::Result<Arc<dyn AudioSink>> {
        Ok(self.sink.clone())
    }
}

#[tokio::test]
async fn test_full_duplex_flow() {
    init_tracing();

    let sink = Arc::new(NullSink::new());
    let agent = MediaAgent::new(config(), Arc::new(CountingDevices { sink: sink.clone() }));
    let mut events = agent.subscribe();
    let remote = peer().await;

    assert!(agent.start_media_session(flow("audio", remote.local_addr().unwrap(), Direction::FullDuplex)).await);
    assert!(agent.is_active("audio"));
    assert_eq!(agent.active_kinds(), vec!["audio".to_string()]);
    match next_event(&mut events).await {
        MediaEvent::FlowStarted { kind, codec } => {
            assert_eq!(kind, "audio");
            assert_eq!(codec, pcmu());
        }
        other => panic!("unexpected event {:?}", other),
    }

    let packet = recv_rtp(&remote).await;
    assert_eq!(packet.header.payload_type, 0);
    assert_eq!(packet.payload.len(), 160);
    assert!(packet.payload.iter().all(|b| *b == 0xFF));

    let local = agent.local_addr("audio").unwrap();
    for seq in 0..5 {
        remote.send_to(&rtp(seq), local).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(2), async {
        while sink.bytes_written() < 5 * 160 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("received audio never reached the sink");

    assert!(agent.stop_media_session("audio").await);
    assert!(!agent.is_active("audio"));
    assert!(!agent.stop_media_session("audio").await);
}

#[tokio::test]
async fn test_symmetric_rtp_follows_remote() {
    init_tracing();

    let agent = MediaAgent::silent(config().with_symmetric_rtp(true));
    let mut events = agent.subscribe();
    let advertised = peer().await;
    let actual = peer().await;
    let actual_addr = actual.local_addr().unwrap();

    assert!(agent.start_media_session(flow("audio", advertised.local_addr().unwrap(), Direction::FullDuplex)).await);
    assert!(matches!(next_event(&mut events).await, MediaEvent::FlowStarted { .. }));
    recv_rtp(&advertised).await;

    actual.send_to(&rtp(1), agent.local_addr("audio").unwrap()).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        MediaEvent::RemoteAddressChanged { kind: "audio".to_string(), addr: actual_addr }
    );
    assert_eq!(agent.send_address("audio"), Some(actual_addr));
    assert_eq!(recv_rtp(&actual).await.header.payload_type, 0);

    agent.stop_all().await;
    assert!(agent.active_kinds().is_empty());
}

#[tokio::test]
async fn test_without_symmetric_rtp_sender_stays() {
    init_tracing();

    let agent = MediaAgent::silent(config());
    let mut events = agent.subscribe();
    let advertised = peer().await;
    let actual = peer().await;

    assert!(agent.start_media_session(flow("audio", advertised.local_addr().unwrap(), Direction::FullDuplex)).await);
    next_event(&mut events).await;

    actual.send_to(&rtp(1), agent.local_addr("audio").unwrap()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, MediaEvent::RemoteAddressChanged { .. }));
    assert_eq!(agent.send_address("audio"), Some(advertised.local_addr().unwrap()));

    agent.stop_all().await;
}

#[tokio::test]
async fn test_receive_only_flow_sends_nothing() {
    init_tracing();

    let agent = MediaAgent::silent(config());
    let remote = peer().await;
    assert!(agent.start_media_session(flow("audio", remote.local_addr().unwrap(), Direction::RecvOnly)).await);
    assert_eq!(agent.send_address("audio"), None);

    let mut buf = [0u8; 1500];
    let silent = tokio::time::timeout(Duration::from_millis(300), remote.recv_from(&mut buf)).await;
    assert!(silent.is_err());

    agent.stop_all().await;
}

#[tokio::test]
async fn test_tone_replaces_capture() {
    init_tracing();

    let agent = MediaAgent::silent(config().with_send_tone(true));
    let remote = peer().await;
    assert!(agent.start_media_session(flow("audio", remote.local_addr().unwrap(), Direction::SendOnly)).await);

    let packet = recv_rtp(&remote).await;
    assert_eq!(packet.payload[0], 0xFF);
    assert_eq!(packet.payload[20], 0x80);
    assert_eq!(packet.payload[60], 0x00);

    agent.stop_all().await;
}

#[tokio::test]
async fn test_restart_replaces_flow() {
    init_tracing();

    let agent = MediaAgent::silent(config());
    let first = peer().await;
    let second = peer().await;

    assert!(agent.start_media_session(flow("audio", first.local_addr().unwrap(), Direction::SendOnly)).await);
    assert!(agent.start_media_session(flow("AUDIO", second.local_addr().unwrap(), Direction::SendOnly)).await);
    assert_eq!(agent.active_kinds(), vec!["audio".to_string()]);
    assert_eq!(agent.flow_spec("audio").unwrap().remote_port, second.local_addr().unwrap().port());
    recv_rtp(&second).await;

    agent.stop_all().await;
}

#[tokio::test]
async fn test_video_is_skipped() {
    init_tracing();

    let agent = MediaAgent::silent(config());
    let remote = peer().await;
    assert!(!agent.start_media_session(flow("video", remote.local_addr().unwrap(), Direction::FullDuplex)).await);
    assert!(!agent.is_active("video"));
}

#[tokio::test]
async fn test_loopback_relays_back_to_remote() {
    init_tracing();

    let agent = MediaAgent::silent(config().with_loopback(true));
    let mut events = agent.subscribe();
    let remote = peer().await;
    let remote_addr = remote.local_addr().unwrap();

    assert!(agent.start_media_session(flow("audio", remote_addr, Direction::FullDuplex)).await);
    next_event(&mut events).await;

    let local = agent.local_addr("audio").unwrap();
    remote.send_to(b"echo me", local).await.unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), remote.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"echo me");
    assert_eq!(from.port(), local.port());
    assert_eq!(
        next_event(&mut events).await,
        MediaEvent::RemoteAddressChanged { kind: "audio".to_string(), addr: remote_addr }
    );

    assert!(agent.stop_media_session("audio").await);
    assert_eq!(next_event(&mut events).await, MediaEvent::FlowTerminated { kind: "audio".to_string() });
    assert_eq!(next_event(&mut events).await, MediaEvent::FlowStopped { kind: "audio".to_string() });
}
