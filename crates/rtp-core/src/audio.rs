//! Audio byte endpoints consumed by RTP streams.
//!
//! The platform capture and playback devices live outside this crate; they
//! are seen here only as an [`AudioSource`] of encoded bytes and an
//! [`AudioSink`] that accepts them. A handful of in-memory endpoints are
//! provided for silence, canned buffers and tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Source of encoded audio bytes
#[async_trait]
pub trait AudioSource: Send {
    /// Begin capture
    async fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` signals end of source.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Stop capture and release the device
    async fn stop(&mut self) {}
}

/// Sink for encoded audio bytes.
///
/// Methods take `&self` so playback can be stopped from a different task
/// than the one writing.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Begin playback
    fn play(&self) {}

    /// Queue bytes for playback
    async fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Stop playback; pending writes should return promptly
    fn stop(&self) {}

    /// Discard queued audio
    fn flush(&self) {}
}

/// Reads a fixed buffer once, then reports end of source
#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Bytes,
    position: usize,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), position: 0 }
    }

    /// `count` frames of `frame_len` bytes, frame `i` filled with `i as u8`
    pub fn numbered_frames(count: usize, frame_len: usize) -> Self {
        let data: Vec<u8> = (0..count)
            .flat_map(|i| std::iter::repeat_n(i as u8, frame_len))
            .collect();
        Self::new(data)
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

#[async_trait]
impl AudioSource for BufferSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// Endless source of a constant byte (e.g. 0xFF is μ-law silence)
#[derive(Debug, Clone)]
pub struct SilenceSource {
    fill: u8,
    limit: Option<usize>,
    produced: usize,
}

impl SilenceSource {
    pub fn new(fill: u8) -> Self {
        Self { fill, limit: None, produced: 0 }
    }

    /// Stop after `bytes` bytes
    pub fn with_limit(mut self, bytes: usize) -> Self {
        self.limit = Some(bytes);
        self
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.limit {
            Some(limit) => buf.len().min(limit.saturating_sub(self.produced)),
            None => buf.len(),
        };
        buf[..n].fill(self.fill);
        self.produced += n;
        Ok(n)
    }
}

/// Forwards every write to a channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
    playing: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, playing: AtomicBool::new(false) }, rx)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for ChannelSink {
    fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sink channel closed"))?;
        Ok(data.len())
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

/// Discards audio, counting bytes
#[derive(Debug, Default)]
pub struct NullSink {
    written: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.written.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffer_source_reads_to_end() {
        let mut source = BufferSource::numbered_frames(3, 4);
        let mut buf = [0u8; 5];
        assert_eq!(source.read(&mut buf).await.unwrap(), 5);
        assert_eq!(buf, [0, 0, 0, 0, 1]);
        assert_eq!(source.read(&mut buf).await.unwrap(), 5);
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_silence_limit() {
        let mut source = SilenceSource::new(0xFF).with_limit(6);
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, [0xFF; 4]);
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::new();
        sink.play();
        assert!(sink.is_playing());
        sink.write(&[1, 2, 3]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[1, 2, 3]));
        sink.stop();
        assert!(!sink.is_playing());
        drop(rx);
        assert!(sink.write(&[4]).await.is_err());
    }
}
