//! End-to-end tests for RTP senders, receivers and relays over loopback UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sippin_rtp_core::prelude::*;
use sippin_rtp_core::{BufferSource, ChannelSink, SilenceSource};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_five_hundred_frames_arrive_contiguous() {
    init_tracing();

    let (sink, mut payloads) = ChannelSink::new();
    let receiver = RtpReceiver::bind(
        RtpReceiverConfig::default().with_early_drop(Duration::ZERO),
        localhost(),
        Arc::new(sink),
        None,
    )
    .await
    .unwrap();
    receiver.start().unwrap();

    let sender = RtpSender::bind(
        RtpSenderConfig::default().with_sync(false),
        Box::new(BufferSource::numbered_frames(500, 160)),
        localhost(),
        receiver.local_addr().unwrap(),
    )
    .await
    .unwrap();
    sender.start().unwrap();

    for i in 0..500usize {
        let payload = tokio::time::timeout(Duration::from_secs(5), payloads.recv())
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        assert_eq!(payload.len(), 160);
        assert_eq!(payload[0], i as u8);
    }

    sender.stop().await;
    receiver.stop().await;

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 500);
    assert_eq!(stats.first_sequence, Some(0));
    assert_eq!(stats.highest_sequence, Some(499));
    assert_eq!(stats.sequence_discontinuities, 0);
    assert_eq!(sender.stats().last_sequence, Some(499));
}

#[tokio::test]
async fn test_symmetric_rtp_retargets_sender() {
    init_tracing();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let shared: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::bind(localhost()).await.unwrap());
    let local = shared.local_addr().unwrap();

    let advertised = UdpSocket::bind(localhost()).await.unwrap();
    let actual = UdpSocket::bind(localhost()).await.unwrap();

    let receiver = RtpReceiver::new(
        RtpReceiverConfig::default()
            .with_early_drop(Duration::ZERO)
            .with_expected_remote(advertised.local_addr().unwrap()),
        TransportHandle::shared(shared.clone()),
        Arc::new(sippin_rtp_core::NullSink::new()),
        Some(events_tx),
    );
    let sender = Arc::new(
        RtpSender::new(
            RtpSenderConfig::default(),
            Box::new(SilenceSource::new(0xFF)),
            TransportHandle::shared(shared.clone()),
            advertised.local_addr().unwrap(),
        )
        .unwrap(),
    );
    receiver.start().unwrap();
    sender.start().unwrap();

    let retarget = {
        let sender = sender.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let ReceiverEvent::RemoteAddressChanged { addr } = event {
                    sender.set_remote_address(addr);
                }
            }
        })
    };

    let mut buf = [0u8; 2048];
    tokio::time::timeout(Duration::from_secs(1), advertised.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // The peer actually sends from a different port
    let packet = RtpPacket::new_with_payload(0, 0, 0, 42, bytes::Bytes::from_static(&[0xFF; 160]));
    actual.send_to(&packet.serialize().unwrap(), local).await.unwrap();

    let (n, from) = tokio::time::timeout(Duration::from_secs(1), actual.recv_from(&mut buf))
        .await
        .expect("sender was not retargeted")
        .unwrap();
    assert_eq!(from, local);
    assert!(RtpPacket::parse(&buf[..n]).is_ok());
    assert_eq!(sender.remote_address(), actual.local_addr().unwrap());

    sender.stop().await;
    receiver.stop().await;
    drop(receiver);
    retarget.await.unwrap();
    assert!(!shared.is_closed());
    shared.close();
}

#[tokio::test]
async fn test_idle_relay_terminates_once() {
    init_tracing();

    let (tx, mut events) = mpsc::unbounded_channel();
    let config = UdpRelayConfig::new(localhost(), "127.0.0.1:9".parse().unwrap())
        .with_recv_timeout(Duration::from_millis(100))
        .with_idle_timeout(Some(Duration::from_millis(300)));
    let relay = UdpRelay::start(config, Some(tx)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("relay did not halt on idle")
        .unwrap();
    assert_eq!(event, RelayEvent::Terminated);
    assert!(!relay.is_running());

    relay.stop().await;
    relay.halt();
    assert!(events.try_recv().is_err());
}
