//! RTP Core library for sippin
//!
//! This crate provides RTP packet encoding/decoding and the real-time
//! streams a voice call runs on.
//!
//! The library is organized into several modules:
//!
//! - `packet`: RTP packet definitions and processing
//! - `transport`: datagram transport abstraction and its UDP implementation
//! - `audio`: audio byte endpoints consumed and fed by the streams
//! - `sender`: paced RTP packetizer
//! - `receiver`: RTP depacketizer with early drop and address learning
//! - `relay`: single-destination UDP relay

mod error;
mod stream;

pub mod audio;
pub mod packet;
pub mod receiver;
pub mod relay;
pub mod sender;
pub mod transport;

pub use error::Error;
pub use stream::StreamState;

pub use audio::{AudioSink, AudioSource, BufferSource, ChannelSink, NullSink, SilenceSource};
pub use packet::{RtpHeader, RtpPacket};
pub use receiver::{ReceiverEvent, RtpReceiver, RtpReceiverConfig, RtpReceiverStats};
pub use relay::{RelayEvent, UdpRelay, UdpRelayConfig, UdpRelayStats};
pub use sender::{RtpSender, RtpSenderConfig, RtpSenderStats};
pub use transport::{DatagramTransport, TransportHandle, UdpTransport};

/// The default maximum size for RTP packets in bytes
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

/// Typedef for RTP timestamp values
pub type RtpTimestamp = u32;

/// Typedef for RTP sequence numbers
pub type RtpSequenceNumber = u16;

/// Typedef for RTP synchronization source identifier
pub type RtpSsrc = u32;

/// Typedef for RTP contributing source identifier
pub type RtpCsrc = u32;

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        AudioSink, AudioSource, DatagramTransport, Error, ReceiverEvent, RelayEvent, Result,
        RtpHeader, RtpPacket, RtpReceiver, RtpReceiverConfig, RtpSender, RtpSenderConfig,
        RtpSequenceNumber, RtpSsrc, RtpTimestamp, StreamState, TransportHandle, UdpRelay,
        UdpRelayConfig, UdpTransport,
    };
}
