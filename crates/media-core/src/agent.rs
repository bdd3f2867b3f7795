//! Media agent
//!
//! Starts and stops the media flows of a call. Each active media kind owns
//! either an RTP sender/receiver pair sharing one UDP socket, or, in loopback
//! mode, a UDP relay bouncing the remote party's packets back to it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sippin_codec_core::{CodecDescriptor, CodecKind};
use sippin_rtp_core::{
    AudioSink, AudioSource, DatagramTransport, NullSink, ReceiverEvent, RelayEvent, RtpReceiver,
    RtpReceiverConfig, RtpSender, RtpSenderConfig, SilenceSource, TransportHandle, UdpRelay,
    UdpRelayConfig, UdpTransport,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flow::FlowSpec;
use crate::tone::ToneSource;

/// Media agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaAgentConfig {
    /// Address flows bind their local port on
    pub bind_addr: IpAddr,
    /// Follow the remote party when its packets arrive from a new address
    pub symmetric_rtp: bool,
    /// Pace outgoing packets against the wall clock
    pub sync: bool,
    pub sync_adjustment_ms: u64,
    /// Drop every Nth received packet; 0 disables
    pub red_rate: u32,
    pub early_drop_ms: u64,
    /// Send a test tone instead of captured audio
    pub send_tone: bool,
    /// Relay the remote party's media back to it instead of running RTP
    pub loopback: bool,
    /// Capacity of the media event channel
    pub event_capacity: usize,
}

impl Default for MediaAgentConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            symmetric_rtp: false,
            sync: true,
            sync_adjustment_ms: 0,
            red_rate: 0,
            early_drop_ms: 200,
            send_tone: false,
            loopback: false,
            event_capacity: 64,
        }
    }
}

impl MediaAgentConfig {
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_symmetric_rtp(mut self, enabled: bool) -> Self {
        self.symmetric_rtp = enabled;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_early_drop_ms(mut self, ms: u64) -> Self {
        self.early_drop_ms = ms;
        self
    }

    pub fn with_red_rate(mut self, red_rate: u32) -> Self {
        self.red_rate = red_rate;
        self
    }

    pub fn with_send_tone(mut self, enabled: bool) -> Self {
        self.send_tone = enabled;
        self
    }

    pub fn with_loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    fn sender_config(&self, codec: &CodecDescriptor) -> RtpSenderConfig {
        RtpSenderConfig::default()
            .with_payload_type(codec.payload_type)
            .with_frame(codec.frame_rate, codec.frame_size)
            .with_packet_size(codec.packet_size as usize)
            .with_sync(self.sync)
            .with_sync_adjustment(Duration::from_millis(self.sync_adjustment_ms))
    }

    fn receiver_config(&self, remote: SocketAddr) -> RtpReceiverConfig {
        RtpReceiverConfig::default()
            .with_early_drop(Duration::from_millis(self.early_drop_ms))
            .with_red_rate(self.red_rate)
            .with_expected_remote(remote)
    }
}

/// Opens the platform capture and playback devices for a flow
#[async_trait]
pub trait AudioDeviceFactory: Send + Sync {
    /// Capture device producing audio already encoded with `codec`
    async fn open_source(&self, codec: &CodecDescriptor) -> Result<Box<dyn AudioSource>>;

    /// Playback device accepting audio encoded with `codec`
    async fn open_sink(&self, codec: &CodecDescriptor) -> Result<Arc<dyn AudioSink>>;
}

/// Devices for headless use: silence in, nothing out
#[derive(Debug, Default, Clone)]
pub struct SilentDeviceFactory;

impl SilentDeviceFactory {
    /// Encoded silence for a codec
    pub fn silence_byte(kind: CodecKind) -> u8 {
        match kind {
            CodecKind::Ulaw => 0xFF,
            CodecKind::Alaw => 0xD5,
            CodecKind::L8 => 0x80,
            _ => 0x00,
        }
    }
}

#[async_trait]
impl AudioDeviceFactory for SilentDeviceFactory {
    async fn open_source(&self, codec: &CodecDescriptor) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(SilenceSource::new(Self::silence_byte(codec.kind))))
    }

    async fn open_sink(&self, _codec: &CodecDescriptor) -> Result<Arc<dyn AudioSink>> {
        Ok(Arc::new(NullSink::new()))
    }
}

/// Notifications published by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    FlowStarted { kind: String, codec: CodecDescriptor },
    FlowStopped { kind: String },
    /// The remote media source moved
    RemoteAddressChanged { kind: String, addr: SocketAddr },
    /// A receive loop or relay ended
    FlowTerminated { kind: String },
}

enum FlowHandle {
    Rtp {
        sender: Option<Arc<RtpSender>>,
        receiver: Option<RtpReceiver>,
        transport: Arc<dyn DatagramTransport>,
    },
    Relay(UdpRelay),
}

struct MediaFlow {
    spec: FlowSpec,
    handle: FlowHandle,
    monitor: JoinHandle<()>,
}

impl MediaFlow {
    fn local_addr(&self) -> Option<SocketAddr> {
        match &self.handle {
            FlowHandle::Rtp { transport, .. } => transport.local_addr().ok(),
            FlowHandle::Relay(relay) => relay.local_addr().ok(),
        }
    }

    async fn shutdown(self) {
        match self.handle {
            FlowHandle::Rtp { sender, receiver, transport } => {
                if let Some(sender) = sender {
                    sender.stop().await;
                }
                if let Some(receiver) = receiver {
                    receiver.stop().await;
                }
                transport.close();
            }
            FlowHandle::Relay(relay) => relay.stop().await,
        }
        // The monitor ends once every event sender is gone
        if let Err(e) = self.monitor.await {
            warn!("{} flow monitor ended abnormally: {}", self.spec.kind, e);
        }
    }
}

/// Runs at most one flow per media kind
pub struct MediaAgent {
    config: MediaAgentConfig,
    devices: Arc<dyn AudioDeviceFactory>,
    flows: DashMap<String, MediaFlow>,
    events: broadcast::Sender<MediaEvent>,
}

impl MediaAgent {
    pub fn new(config: MediaAgentConfig, devices: Arc<dyn AudioDeviceFactory>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            devices,
            flows: DashMap::new(),
            events,
        }
    }

    /// Agent with [`SilentDeviceFactory`] devices
    pub fn silent(config: MediaAgentConfig) -> Self {
        Self::new(config, Arc::new(SilentDeviceFactory))
    }

    pub fn config(&self) -> &MediaAgentConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Start the flow described by `spec`, replacing any flow of the same
    /// kind. Returns whether anything was started.
    pub async fn start_media_session(&self, spec: FlowSpec) -> bool {
        let kind = spec.kind.to_ascii_lowercase();
        info!("new flow: {}", spec);

        if self.flows.contains_key(&kind) {
            self.stop_media_session(&kind).await;
        }

        let started = if self.config.loopback {
            self.start_relay(&kind, spec).await
        } else {
            self.start_rtp(&kind, spec).await
        };

        match started {
            Ok(flow) => {
                let codec = flow.spec.codec.clone();
                if let Some(previous) = self.flows.insert(kind.clone(), flow) {
                    previous.shutdown().await;
                }
                let _ = self.events.send(MediaEvent::FlowStarted { kind, codec });
                true
            }
            Err(e) => {
                warn!("{} not started: {}", kind, e);
                false
            }
        }
    }

    /// Stop the flow of one media kind. Returns false if none was running.
    pub async fn stop_media_session(&self, kind: &str) -> bool {
        let kind = kind.to_ascii_lowercase();
        let Some((_, flow)) = self.flows.remove(&kind) else {
            debug!("no running {} flow", kind);
            return false;
        };
        info!("stopping {} flow", kind);
        flow.shutdown().await;
        let _ = self.events.send(MediaEvent::FlowStopped { kind });
        true
    }

    pub async fn stop_all(&self) {
        for kind in self.active_kinds() {
            self.stop_media_session(&kind).await;
        }
    }

    pub fn active_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.flows.iter().map(|entry| entry.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn is_active(&self, kind: &str) -> bool {
        self.flows.contains_key(&kind.to_ascii_lowercase())
    }

    /// Flow currently running for a kind
    pub fn flow_spec(&self, kind: &str) -> Option<FlowSpec> {
        self.flows.get(&kind.to_ascii_lowercase()).map(|f| f.spec.clone())
    }

    /// Bound local address of a running flow
    pub fn local_addr(&self, kind: &str) -> Option<SocketAddr> {
        self.flows.get(&kind.to_ascii_lowercase()).and_then(|f| f.local_addr())
    }

    /// Where the flow's sender currently sends
    pub fn send_address(&self, kind: &str) -> Option<SocketAddr> {
        self.flows.get(&kind.to_ascii_lowercase()).and_then(|f| match &f.handle {
            FlowHandle::Rtp { sender: Some(sender), .. } => Some(sender.remote_address()),
            FlowHandle::Relay(relay) => Some(relay.destination()),
            _ => None,
        })
    }

    async fn start_rtp(&self, kind: &str, spec: FlowSpec) -> Result<MediaFlow> {
        if kind != "audio" {
            return Err(Error::UnsupportedMedia(kind.to_string()));
        }

        let local = SocketAddr::new(self.config.bind_addr, spec.local_port);
        let transport: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::bind(local).await?);
        let remote = spec.remote_socket_addr();

        let sender = if spec.direction.sends() {
            match self.open_sender(&spec, transport.clone()).await {
                Ok(sender) => Some(Arc::new(sender)),
                Err(e) => {
                    warn!("{} sender not started: {}", kind, e);
                    None
                }
            }
        } else {
            None
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let receiver = if spec.direction.receives() {
            match self.open_receiver(&spec, transport.clone(), events_tx).await {
                Ok(receiver) => Some(receiver),
                Err(e) => {
                    warn!("{} receiver not started: {}", kind, e);
                    None
                }
            }
        } else {
            drop(events_tx);
            None
        };

        if sender.is_none() && receiver.is_none() {
            transport.close();
            return Err(Error::InvalidState(format!("no {} stream could be started", kind)));
        }

        info!(
            "{} flow {:?} -> {} ({}, sender: {}, receiver: {})",
            kind,
            transport.local_addr().ok(),
            remote,
            spec.codec,
            sender.is_some(),
            receiver.is_some()
        );

        let monitor = tokio::spawn(monitor_receiver(
            kind.to_string(),
            events_rx,
            if self.config.symmetric_rtp { sender.clone() } else { None },
            self.events.clone(),
        ));

        Ok(MediaFlow {
            spec,
            handle: FlowHandle::Rtp { sender, receiver, transport },
            monitor,
        })
    }

    async fn open_sender(&self, spec: &FlowSpec, transport: Arc<dyn DatagramTransport>) -> Result<RtpSender> {
        let source: Box<dyn AudioSource> = match self.config.send_tone {
            true => match ToneSource::for_codec(&spec.codec) {
                Some(tone) => Box::new(tone),
                None => {
                    warn!("cannot synthesize a tone in {}, using the capture device", spec.codec.name());
                    self.devices.open_source(&spec.codec).await?
                }
            },
            false => self.devices.open_source(&spec.codec).await?,
        };

        let sender = RtpSender::new(
            self.config.sender_config(&spec.codec),
            source,
            TransportHandle::shared(transport),
            spec.remote_socket_addr(),
        )?;
        sender.start()?;
        Ok(sender)
    }

    async fn open_receiver(
        &self,
        spec: &FlowSpec,
        transport: Arc<dyn DatagramTransport>,
        events: mpsc::UnboundedSender<ReceiverEvent>,
    ) -> Result<RtpReceiver> {
        let sink = self.devices.open_sink(&spec.codec).await?;
        let receiver = RtpReceiver::new(
            self.config.receiver_config(spec.remote_socket_addr()),
            TransportHandle::shared(transport),
            sink,
            Some(events),
        );
        receiver.start()?;
        Ok(receiver)
    }

    async fn start_relay(&self, kind: &str, spec: FlowSpec) -> Result<MediaFlow> {
        let config = UdpRelayConfig::new(
            SocketAddr::new(self.config.bind_addr, spec.local_port),
            spec.remote_socket_addr(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let relay = UdpRelay::start(config, Some(events_tx)).await?;
        info!("relay {:?} -> {} started", relay.local_addr().ok(), relay.destination());

        let monitor = tokio::spawn(monitor_relay(kind.to_string(), events_rx, self.events.clone()));
        Ok(MediaFlow {
            spec,
            handle: FlowHandle::Relay(relay),
            monitor,
        })
    }
}

impl Drop for MediaAgent {
    fn drop(&mut self) {
        for entry in self.flows.iter() {
            match &entry.handle {
                FlowHandle::Rtp { sender, receiver, transport } => {
                    if let Some(sender) = sender {
                        sender.halt();
                    }
                    if let Some(receiver) = receiver {
                        receiver.halt();
                    }
                    transport.close();
                }
                FlowHandle::Relay(relay) => relay.halt(),
            }
        }
    }
}

async fn monitor_receiver(
    kind: String,
    mut events: mpsc::UnboundedReceiver<ReceiverEvent>,
    sender: Option<Arc<RtpSender>>,
    publish: broadcast::Sender<MediaEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ReceiverEvent::RemoteAddressChanged { addr } => {
                if let Some(sender) = &sender {
                    sender.set_remote_address(addr);
                }
                let _ = publish.send(MediaEvent::RemoteAddressChanged { kind: kind.clone(), addr });
            }
            ReceiverEvent::Terminated => {
                debug!("{} receiver terminated", kind);
                let _ = publish.send(MediaEvent::FlowTerminated { kind: kind.clone() });
            }
        }
    }
}

async fn monitor_relay(
    kind: String,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
    publish: broadcast::Sender<MediaEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::SourceChanged { addr } => {
                info!("UDP relay: remote address changed: {}", addr);
                let _ = publish.send(MediaEvent::RemoteAddressChanged { kind: kind.clone(), addr });
            }
            RelayEvent::Terminated => {
                info!("UDP relay: terminated");
                let _ = publish.send(MediaEvent::FlowTerminated { kind: kind.clone() });
            }
        }
    }
}
