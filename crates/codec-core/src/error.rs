//! Error handling for the codec catalog

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised by strict catalog lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The name matched no canonical codec or alias
    #[error("Unknown codec: {name}")]
    UnknownCodec { name: String },

    /// The payload type matched no static catalog entry
    #[error("Unknown payload type: {payload_type}")]
    UnknownPayloadType { payload_type: u8 },

    /// A resolved descriptor would carry no audio per packet
    #[error("Invalid packet size {packet_size} for codec {codec}")]
    InvalidPacketSize { codec: String, packet_size: u32 },
}
