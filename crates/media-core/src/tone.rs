//! Test tone generator encoded directly in the flow's codec.

use std::f64::consts::PI;
use std::io;

use async_trait::async_trait;
use sippin_codec_core::{g711, CodecDescriptor, CodecKind};
use sippin_rtp_core::AudioSource;

/// Default test tone frequency in Hz
pub const DEFAULT_TONE_FREQUENCY: f64 = 100.0;

/// Default amplitude, from 0.0 to 1.0
pub const DEFAULT_TONE_AMPLITUDE: f64 = 1.0;

/// Endless sine tone.
///
/// Only sample-per-byte (or per two bytes) encodings can be synthesized:
/// μ-law, A-law, L16 (big-endian) and L8 (offset binary).
#[derive(Debug, Clone)]
pub struct ToneSource {
    kind: CodecKind,
    sample_rate: u32,
    frequency: f64,
    amplitude: f64,
    /// Bytes produced so far
    position: u64,
}

impl ToneSource {
    /// Tone for the codec of a flow, or `None` if it cannot be synthesized
    pub fn for_codec(codec: &CodecDescriptor) -> Option<Self> {
        Self::new(codec.kind, codec.sample_rate, DEFAULT_TONE_FREQUENCY, DEFAULT_TONE_AMPLITUDE)
    }

    pub fn new(kind: CodecKind, sample_rate: u32, frequency: f64, amplitude: f64) -> Option<Self> {
        if !Self::supports(kind) || sample_rate == 0 {
            return None;
        }
        Some(Self {
            kind,
            sample_rate,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            position: 0,
        })
    }

    pub fn supports(kind: CodecKind) -> bool {
        matches!(kind, CodecKind::Ulaw | CodecKind::Alaw | CodecKind::L16 | CodecKind::L8)
    }

    fn bytes_per_sample(&self) -> u64 {
        if self.kind == CodecKind::L16 { 2 } else { 1 }
    }

    fn sample(&self, n: u64) -> i16 {
        let phase = 2.0 * PI * self.frequency * n as f64 / self.sample_rate as f64;
        (phase.sin() * self.amplitude * i16::MAX as f64) as i16
    }

    fn byte_at(&self, position: u64) -> u8 {
        let width = self.bytes_per_sample();
        let sample = self.sample(position / width);
        match self.kind {
            CodecKind::Ulaw => g711::ulaw_compress(sample),
            CodecKind::Alaw => g711::alaw_compress(sample),
            CodecKind::L16 => sample.to_be_bytes()[(position % width) as usize],
            // L8 is unsigned with 128 at zero
            _ => ((sample >> 8) as i8 as u8) ^ 0x80,
        }
    }
}

#[async_trait]
impl AudioSource for ToneSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        for byte in buf.iter_mut() {
            *byte = self.byte_at(self.position);
            self.position += 1;
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sippin_codec_core::{CodecCatalog, CodecOverrides};

    #[tokio::test]
    async fn test_ulaw_tone_peaks() {
        let codec = CodecCatalog::standard().resolve("PCMU", &CodecOverrides::none());
        let mut tone = ToneSource::for_codec(&codec).unwrap();
        // 100 Hz at 8 kHz: one period every 80 samples
        let mut buf = [0u8; 160];
        assert_eq!(tone.read(&mut buf).await.unwrap(), 160);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(buf[20], 0x80);
        assert_eq!(buf[60], 0x00);
        assert_eq!(buf[100], 0x80);
    }

    #[tokio::test]
    async fn test_l16_is_big_endian_pairs() {
        let mut tone = ToneSource::new(CodecKind::L16, 8000, 1000.0, 0.5).unwrap();
        let mut buf = [0u8; 8];
        tone.read(&mut buf).await.unwrap();
        let second = i16::from_be_bytes([buf[2], buf[3]]);
        let expected = ((2.0 * PI * 1000.0 / 8000.0).sin() * 0.5 * i16::MAX as f64) as i16;
        assert_eq!(second, expected);
    }

    #[test]
    fn test_unsupported_codecs() {
        let codec = CodecCatalog::standard().resolve("GSM", &CodecOverrides::none());
        assert!(ToneSource::for_codec(&codec).is_none());
        assert!(ToneSource::new(CodecKind::Ulaw, 0, 100.0, 1.0).is_none());
    }
}
