//! Seekable buffer over a forward-only source
//!
//! Every byte pulled from the inner source is retained so the reader can
//! seek back into audio it has already consumed (the listener pipeline
//! rewinds to capture speech that began just before the wake word).
//!
//! **Retention:** unbounded by default. With a retention limit, bytes more
//! than `limit` behind the read position are discarded in batches and can no
//! longer be sought to.

use super::source::{AudioSource, Lifecycle, SourceState};
use crate::error::Result;
use async_trait::async_trait;
use std::io::SeekFrom;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct BufferedSeekSource<S> {
    inner: S,
    store: Vec<u8>,
    /// Absolute stream offset of `store[0]`
    base: u64,
    /// Read position relative to `store[0]`
    position: usize,
    chunk: Vec<u8>,
    retention: Option<usize>,
    ended: bool,
    lifecycle: Lifecycle,
}

impl<S: AudioSource> BufferedSeekSource<S> {
    /// Pull from `inner` in blocks of `chunk_size` bytes
    pub fn new(inner: S, chunk_size: usize) -> Self {
        Self {
            inner,
            store: Vec::new(),
            base: 0,
            position: 0,
            chunk: vec![0u8; chunk_size.max(1)],
            retention: None,
            ended: false,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Keep at most `bytes` of already-read history
    pub fn with_retention(mut self, bytes: usize) -> Self {
        self.retention = Some(bytes);
        self
    }

    /// Absolute read position in the inner stream
    pub fn position(&self) -> u64 {
        self.base + self.position as u64
    }

    /// Oldest absolute offset still seekable
    pub fn earliest(&self) -> u64 {
        self.base
    }

    /// Bytes buffered ahead of the read position
    pub fn available(&self) -> usize {
        self.store.len() - self.position
    }

    /// Move the read position, clamped to the retained range
    ///
    /// `SeekFrom::End` is relative to the last byte pulled so far, not the
    /// (unknown) end of the inner stream. Returns the new absolute position.
    pub fn seek(&mut self, target: SeekFrom) -> u64 {
        let end = self.base + self.store.len() as u64;
        let requested: i128 = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position() as i128 + delta as i128,
            SeekFrom::End(delta) => end as i128 + delta as i128,
        };
        let clamped = requested.clamp(self.base as i128, end as i128) as u64;
        if clamped as i128 != requested {
            debug!(
                "Seek to {} clamped to {} (retained {}..{})",
                requested, clamped, self.base, end
            );
        }
        self.position = (clamped - self.base) as usize;
        clamped
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn trim(&mut self) {
        if let Some(keep) = self.retention {
            // Discard in batches to avoid shifting the store on every read
            if self.position > keep.saturating_mul(2).max(keep + self.chunk.len()) {
                let discard = self.position - keep;
                self.store.drain(..discard);
                self.base += discard as u64;
                self.position -= discard;
            }
        }
    }
}

#[async_trait]
impl<S: AudioSource> AudioSource for BufferedSeekSource<S> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("BufferedSeekSource")? {
            return Ok(());
        }
        let result = self.inner.prepare(cancel).await;
        self.lifecycle.finish_prepare(&result);
        result
    }

    /// Blocks until `buf.len()` bytes are buffered or the inner source ends
    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("BufferedSeekSource")?;

        while self.available() < buf.len() && !self.ended {
            let count = self.inner.read(&mut self.chunk, cancel).await?;
            if count == 0 {
                self.ended = true;
                break;
            }
            self.store.extend_from_slice(&self.chunk[..count]);
        }

        let count = buf.len().min(self.available());
        buf[..count].copy_from_slice(&self.store[self.position..self.position + count]);
        self.position += count;
        self.trim();
        Ok(count)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.store = Vec::new();
            self.position = 0;
            self.inner.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemorySource;

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[tokio::test]
    async fn test_seek_back_replays_bytes() {
        let cancel = CancellationToken::new();
        let mut source = BufferedSeekSource::new(MemorySource::new(counting(10)), 3);
        source.prepare(&cancel).await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);

        assert_eq!(source.seek(SeekFrom::Current(-2)), 2);
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 4);
        assert_eq!(buf, [2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_read_fills_across_chunks_until_end() {
        let cancel = CancellationToken::new();
        let mut source = BufferedSeekSource::new(MemorySource::new(counting(5)), 2);
        source.prepare(&cancel).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 5);
        assert_eq!(&buf[..5], &[0, 1, 2, 3, 4]);
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seek_is_clamped() {
        let cancel = CancellationToken::new();
        let mut source = BufferedSeekSource::new(MemorySource::new(counting(6)), 6);
        source.prepare(&cancel).await.unwrap();

        let mut buf = [0u8; 2];
        source.read(&mut buf, &cancel).await.unwrap();
        assert_eq!(source.seek(SeekFrom::Current(-100)), 0);
        assert_eq!(source.seek(SeekFrom::Start(100)), 6);
        assert_eq!(source.seek(SeekFrom::End(-1)), 5);
    }

    #[tokio::test]
    async fn test_retention_discards_old_bytes() {
        let cancel = CancellationToken::new();
        let mut source =
            BufferedSeekSource::new(MemorySource::new(counting(64)), 4).with_retention(4);
        source.prepare(&cancel).await.unwrap();

        let mut buf = [0u8; 4];
        for _ in 0..8 {
            source.read(&mut buf, &cancel).await.unwrap();
        }
        assert_eq!(source.position(), 32);
        assert!(source.earliest() > 0);
        assert!(source.position() - source.earliest() >= 4);

        // Can still rewind within the retained window
        source.seek(SeekFrom::Current(-4));
        source.read(&mut buf, &cancel).await.unwrap();
        assert_eq!(buf, [28, 29, 30, 31]);
    }
}
