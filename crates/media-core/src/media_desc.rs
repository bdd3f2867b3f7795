//! Media descriptors: one media kind with its port, transport and ordered
//! codec candidates.

use std::fmt;

use sippin_codec_core::{CodecCatalog, CodecDescriptor, CodecOverrides, MAX_SAMPLE_RATE};
use tracing::debug;

use crate::sdp::{RtpMap, SdpMedia};

/// Transport written on generated `m=` lines
pub const DEFAULT_TRANSPORT: &str = "RTP/AVP";

/// One media block of a session, local or remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Media type (e.g. "audio")
    pub kind: String,
    pub port: u16,
    pub transport: String,
    /// Candidates in preference order
    pub codecs: Vec<CodecDescriptor>,
}

impl MediaDescriptor {
    pub fn new(kind: impl Into<String>, port: u16, transport: impl Into<String>, codecs: Vec<CodecDescriptor>) -> Self {
        Self {
            kind: kind.into(),
            port,
            transport: transport.into(),
            codecs,
        }
    }

    /// Local audio block from a list of codec names.
    ///
    /// Sample rate and packet size overrides apply to every codec; names the
    /// catalog does not know resolve to its default codec.
    pub fn audio(port: u16, catalog: &CodecCatalog, codec_names: &[String], overrides: &CodecOverrides) -> Self {
        let mut codecs: Vec<CodecDescriptor> = Vec::with_capacity(codec_names.len());
        for name in codec_names {
            let codec = catalog.resolve(name, overrides);
            if codecs.iter().any(|c| c.payload_type == codec.payload_type && c.kind == codec.kind) {
                continue;
            }
            codecs.push(codec);
        }
        Self::new("audio", port, DEFAULT_TRANSPORT, codecs)
    }

    /// Build from a parsed `m=` block.
    ///
    /// Each format is resolved through its `a=rtpmap` (keeping the announced
    /// payload type and clock rate); formats without one fall back to the
    /// static payload type table. Anything else, including clock rates above
    /// [`MAX_SAMPLE_RATE`], is skipped.
    pub fn from_sdp(media: &SdpMedia, catalog: &CodecCatalog) -> Self {
        let mut codecs = Vec::new();
        for pt in media.payload_types() {
            match media.rtpmap(pt) {
                Some(map) if map.clock_rate > MAX_SAMPLE_RATE => {
                    debug!(
                        "Skipping format {} of {} block: clock rate {} out of range",
                        pt, media.media, map.clock_rate
                    );
                }
                Some(map) => {
                    let overrides = CodecOverrides::none()
                        .with_payload_type(pt)
                        .with_sample_rate(map.clock_rate);
                    codecs.push(catalog.resolve(&map.encoding_name, &overrides));
                }
                None => match catalog.resolve_payload_type(pt, &CodecOverrides::none()) {
                    Ok(codec) => codecs.push(codec),
                    Err(e) => debug!("Skipping format {} of {} block: {}", pt, media.media, e),
                },
            }
        }
        Self::new(media.media.clone(), media.port, media.protocol.clone(), codecs)
    }

    /// The equivalent `m=` block
    pub fn to_sdp(&self) -> SdpMedia {
        let formats = self.codecs.iter().map(|c| c.payload_type.to_string()).collect();
        let mut media = SdpMedia::new(self.kind.clone(), self.port, self.transport.clone(), formats);
        for codec in &self.codecs {
            media.rtpmaps.push(RtpMap::new(codec.payload_type, codec.encoding_name(), codec.sample_rate));
        }
        media
    }

    /// Media kinds compare case-insensitively
    pub fn same_kind(&self, other: &MediaDescriptor) -> bool {
        self.is_kind(&other.kind)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }

    /// First candidate carrying this payload type
    pub fn codec_for_payload_type(&self, payload_type: u8) -> Option<&CodecDescriptor> {
        self.codecs.iter().find(|c| c.payload_type == payload_type)
    }

    /// A zero port marks a disabled or rejected block
    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.port, self.transport)?;
        if !self.codecs.is_empty() {
            write!(f, " {{")?;
            for (i, codec) in self.codecs.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {}", codec)?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}
