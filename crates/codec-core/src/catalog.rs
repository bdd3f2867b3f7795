//! Table-driven codec catalog.
//!
//! A [`CodecCatalog`] is built once and shared (usually behind an `Arc`) by
//! everything that needs to turn a codec name into RTP parameters. Resolution
//! is pure: two endpoints resolving the same name derive the same packet
//! timing.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{CodecError, Result};
use crate::types::{packet_rate, CodecDescriptor, CodecKind, CodecOverrides};

/// Sample rate used when the caller supplies none
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Highest clock rate accepted for an audio codec
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// How an entry derives its frame rate from the sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRateRule {
    /// One frame per sample
    SampleRate,
    /// One frame per `n` samples
    Divisor(u32),
}

impl FrameRateRule {
    fn frame_rate(self, sample_rate: u32) -> u32 {
        match self {
            FrameRateRule::SampleRate => sample_rate,
            FrameRateRule::Divisor(n) => sample_rate / n.max(1),
        }
    }
}

/// One row of the catalog table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecEntry {
    pub kind: CodecKind,
    pub payload_type: u8,
    pub frame_size: u32,
    pub frame_rate: FrameRateRule,
    pub default_packet_size: u32,
}

impl CodecEntry {
    const fn new(
        kind: CodecKind,
        payload_type: u8,
        frame_size: u32,
        frame_rate: FrameRateRule,
        default_packet_size: u32,
    ) -> Self {
        Self { kind, payload_type, frame_size, frame_rate, default_packet_size }
    }
}

const STANDARD_ENTRIES: [CodecEntry; 8] = [
    CodecEntry::new(CodecKind::Ulaw, 0, 1, FrameRateRule::SampleRate, 160),
    CodecEntry::new(CodecKind::Alaw, 8, 1, FrameRateRule::SampleRate, 160),
    CodecEntry::new(CodecKind::G726_24, 101, 3, FrameRateRule::Divisor(8), 60),
    CodecEntry::new(CodecKind::G726_32, 101, 4, FrameRateRule::Divisor(8), 80),
    CodecEntry::new(CodecKind::G726_40, 101, 5, FrameRateRule::Divisor(8), 100),
    CodecEntry::new(CodecKind::Gsm0610, 3, 33, FrameRateRule::Divisor(160), 33),
    CodecEntry::new(CodecKind::L16, 11, 2, FrameRateRule::SampleRate, 320),
    CodecEntry::new(CodecKind::L8, 98, 1, FrameRateRule::SampleRate, 160),
];

const STANDARD_ALIASES: [(&str, CodecKind); 12] = [
    ("PCMU", CodecKind::Ulaw),
    ("G711-ULAW", CodecKind::Ulaw),
    ("G711_ULAW", CodecKind::Ulaw),
    ("PCMA", CodecKind::Alaw),
    ("G711-ALAW", CodecKind::Alaw),
    ("G711_ALAW", CodecKind::Alaw),
    ("G726-24", CodecKind::G726_24),
    ("ADPCM24", CodecKind::G726_24),
    ("G726-32", CodecKind::G726_32),
    ("ADPCM32", CodecKind::G726_32),
    ("G726-40", CodecKind::G726_40),
    ("ADPCM40", CodecKind::G726_40),
];

/// Immutable catalog of supported audio encodings
#[derive(Debug, Clone)]
pub struct CodecCatalog {
    entries: HashMap<CodecKind, CodecEntry>,
    aliases: HashMap<String, CodecKind>,
    default_codec: CodecKind,
    default_sample_rate: u32,
}

impl CodecCatalog {
    /// The stock table: G.711, G.726, GSM and linear PCM
    pub fn standard() -> Self {
        let entries = STANDARD_ENTRIES.iter().map(|e| (e.kind, e.clone())).collect();

        let mut aliases: HashMap<String, CodecKind> = CodecKind::ALL
            .iter()
            .map(|kind| (kind.name().to_string(), *kind))
            .collect();
        for (alias, kind) in STANDARD_ALIASES {
            aliases.insert(alias.to_string(), kind);
        }
        aliases.insert("GSM".to_string(), CodecKind::Gsm0610);

        Self {
            entries,
            aliases,
            default_codec: CodecKind::Ulaw,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Replace the fallback codec used for unknown names
    pub fn with_default_codec(mut self, kind: CodecKind) -> Self {
        self.default_codec = kind;
        self
    }

    /// Add an extra alias for an existing entry
    pub fn with_alias(mut self, alias: &str, kind: CodecKind) -> Self {
        self.aliases.insert(alias.trim().to_ascii_uppercase(), kind);
        self
    }

    /// The fallback codec
    pub fn default_codec(&self) -> CodecKind {
        self.default_codec
    }

    /// Map a free-form name (any case, any known alias) to a canonical codec
    pub fn normalize(&self, name: &str) -> Option<CodecKind> {
        let key = name.trim().to_ascii_uppercase();
        self.aliases.get(&key).copied().filter(|kind| self.entries.contains_key(kind))
    }

    /// Table row for a codec
    pub fn entry(&self, kind: CodecKind) -> Option<&CodecEntry> {
        self.entries.get(&kind)
    }

    /// Codec for a static payload type, if exactly one entry claims it
    pub fn lookup_payload_type(&self, payload_type: u8) -> Option<CodecKind> {
        let mut matches = CodecKind::ALL
            .iter()
            .filter_map(|kind| self.entries.get(kind))
            .filter(|e| e.payload_type == payload_type);
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Some(entry.kind),
            _ => None,
        }
    }

    /// Resolve a name into a descriptor.
    ///
    /// Unknown names fall back to the default codec with a warning.
    pub fn resolve(&self, name: &str, overrides: &CodecOverrides) -> CodecDescriptor {
        let kind = match self.normalize(name) {
            Some(kind) => kind,
            None => {
                warn!(
                    "Unknown codec '{}', falling back to {}",
                    name, self.default_codec
                );
                self.default_codec
            }
        };
        self.descriptor(kind, overrides)
    }

    /// Resolve a name, failing instead of falling back
    pub fn try_resolve(&self, name: &str, overrides: &CodecOverrides) -> Result<CodecDescriptor> {
        let kind = self
            .normalize(name)
            .ok_or_else(|| CodecError::UnknownCodec { name: name.to_string() })?;
        let descriptor = self.descriptor(kind, overrides);
        if descriptor.packet_rate == 0 {
            return Err(CodecError::InvalidPacketSize {
                codec: kind.name().to_string(),
                packet_size: descriptor.packet_size,
            });
        }
        Ok(descriptor)
    }

    /// Descriptor for a static payload type
    pub fn resolve_payload_type(
        &self,
        payload_type: u8,
        overrides: &CodecOverrides,
    ) -> Result<CodecDescriptor> {
        let kind = self
            .lookup_payload_type(payload_type)
            .ok_or(CodecError::UnknownPayloadType { payload_type })?;
        Ok(self.descriptor(kind, overrides))
    }

    /// Descriptor for a canonical codec with caller overrides applied
    pub fn descriptor(&self, kind: CodecKind, overrides: &CodecOverrides) -> CodecDescriptor {
        let entry = match self.entries.get(&kind) {
            Some(entry) => entry,
            // Every catalog holds its default codec; fall back to its row.
            None => &self.entries[&self.default_codec],
        };

        let sample_rate = overrides.positive_sample_rate().unwrap_or(self.default_sample_rate);
        let packet_size = overrides.positive_packet_size().unwrap_or(entry.default_packet_size);
        let payload_type = overrides.positive_payload_type().unwrap_or(entry.payload_type);
        let frame_rate = entry.frame_rate.frame_rate(sample_rate);

        CodecDescriptor {
            kind: entry.kind,
            payload_type,
            sample_rate,
            frame_size: entry.frame_size,
            frame_rate,
            packet_size,
            packet_rate: packet_rate(frame_rate, entry.frame_size, packet_size),
        }
    }

    /// All canonical codecs in this catalog
    pub fn kinds(&self) -> impl Iterator<Item = CodecKind> + '_ {
        CodecKind::ALL.into_iter().filter(|kind| self.entries.contains_key(kind))
    }
}

impl Default for CodecCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
