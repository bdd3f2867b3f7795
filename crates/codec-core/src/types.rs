//! Core codec types: the canonical codec set, caller overrides, and the
//! resolved descriptor handed to the RTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical codec identities known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum CodecKind {
    /// G.711 μ-law
    Ulaw,
    /// G.711 A-law
    Alaw,
    /// G.726 ADPCM at 24 kbit/s
    G726_24,
    /// G.726 ADPCM at 32 kbit/s
    G726_32,
    /// G.726 ADPCM at 40 kbit/s
    G726_40,
    /// GSM 06.10 full rate
    Gsm0610,
    /// Linear 16-bit PCM
    L16,
    /// Linear 8-bit PCM
    L8,
}

impl CodecKind {
    /// Every canonical codec, in catalog order
    pub const ALL: [CodecKind; 8] = [
        CodecKind::Ulaw,
        CodecKind::Alaw,
        CodecKind::G726_24,
        CodecKind::G726_32,
        CodecKind::G726_40,
        CodecKind::Gsm0610,
        CodecKind::L16,
        CodecKind::L8,
    ];

    /// Canonical (internal) name
    pub fn name(self) -> &'static str {
        match self {
            Self::Ulaw => "ULAW",
            Self::Alaw => "ALAW",
            Self::G726_24 => "G726_24",
            Self::G726_32 => "G726_32",
            Self::G726_40 => "G726_40",
            Self::Gsm0610 => "GSM0610",
            Self::L16 => "L16",
            Self::L8 => "L8",
        }
    }

    /// Encoding name as written in an SDP `a=rtpmap` line
    pub fn encoding_name(self) -> &'static str {
        match self {
            Self::Ulaw => "PCMU",
            Self::Alaw => "PCMA",
            Self::G726_24 => "G726-24",
            Self::G726_32 => "G726-32",
            Self::G726_40 => "G726-40",
            Self::Gsm0610 => "GSM",
            Self::L16 => "L16",
            Self::L8 => "L8",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied values that take precedence over the catalog table.
///
/// Zero means "not set", so `Some(0)` behaves like `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecOverrides {
    /// RTP payload type
    pub payload_type: Option<u8>,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Packet payload size in bytes
    pub packet_size: Option<u32>,
}

impl CodecOverrides {
    /// No overrides
    pub fn none() -> Self {
        Self::default()
    }

    /// Override the payload type
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    /// Override the sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Override the packet size
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = Some(packet_size);
        self
    }

    pub(crate) fn positive_payload_type(&self) -> Option<u8> {
        self.payload_type.filter(|pt| *pt > 0)
    }

    pub(crate) fn positive_sample_rate(&self) -> Option<u32> {
        self.sample_rate.filter(|sr| *sr > 0)
    }

    pub(crate) fn positive_packet_size(&self) -> Option<u32> {
        self.packet_size.filter(|ps| *ps > 0)
    }
}

/// Fully resolved codec parameters.
///
/// Built by [`crate::CodecCatalog::resolve`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecDescriptor {
    /// Canonical codec
    pub kind: CodecKind,
    /// RTP payload type
    pub payload_type: u8,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bytes per codec frame
    pub frame_size: u32,
    /// Codec frames per second
    pub frame_rate: u32,
    /// Payload bytes per RTP packet
    pub packet_size: u32,
    /// Packets per second, `frame_rate * frame_size / packet_size`
    pub packet_rate: u32,
}

impl CodecDescriptor {
    /// Canonical codec name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// SDP encoding name
    pub fn encoding_name(&self) -> &'static str {
        self.kind.encoding_name()
    }

    /// `a=rtpmap` value without the payload type, e.g. `PCMU/8000`
    pub fn rtpmap(&self) -> String {
        format!("{}/{}", self.encoding_name(), self.sample_rate)
    }

    /// Encoded bytes per second
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.frame_rate) * u64::from(self.frame_size)
    }

    /// Milliseconds of audio carried by `bytes` of encoded payload
    pub fn duration_ms(&self, bytes: usize) -> u64 {
        match self.byte_rate() {
            0 => 0,
            rate => (bytes as u64).saturating_mul(1000) / rate,
        }
    }

    /// Nominal packetization time in milliseconds
    pub fn packet_time_ms(&self) -> u64 {
        self.duration_ms(self.packet_size as usize)
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.payload_type, self.rtpmap())
    }
}

/// Packets per second for the given frame parameters (floor division).
///
/// A zero packet size yields zero rather than dividing by zero; rates too
/// large for a `u32` saturate.
pub fn packet_rate(frame_rate: u32, frame_size: u32, packet_size: u32) -> u32 {
    if packet_size == 0 {
        return 0;
    }
    let rate = u64::from(frame_rate) * u64::from(frame_size) / u64::from(packet_size);
    u32::try_from(rate).unwrap_or(u32::MAX)
}
