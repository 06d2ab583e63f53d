//! In-memory PCM source

use super::source::{AudioSource, Lifecycle, SourceState};
use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Serves a fixed byte block, then ends
#[derive(Debug, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
    lifecycle: Lifecycle,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            lifecycle: Lifecycle::new(),
        }
    }

    /// `bytes` of digital silence
    pub fn silence(bytes: usize) -> Self {
        Self::new(vec![0u8; bytes])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Rewind to the first byte
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.lifecycle.begin_prepare("MemorySource")? {
            self.lifecycle.finish_prepare(&Ok(()));
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], _cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("MemorySource")?;
        let count = buf.len().min(self.remaining());
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.data = Vec::new();
            self.position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_reads_then_ends() {
        let cancel = CancellationToken::new();
        let mut source = MemorySource::new(vec![1, 2, 3, 4, 5]);
        source.prepare(&cancel).await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_before_prepare_fails() {
        let cancel = CancellationToken::new();
        let mut source = MemorySource::silence(8);
        let mut buf = [0u8; 4];
        assert!(matches!(
            source.read(&mut buf, &cancel).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose_then_read_fails() {
        let cancel = CancellationToken::new();
        let mut source = MemorySource::silence(8);
        source.prepare(&cancel).await.unwrap();
        source.dispose().await;
        source.dispose().await;

        let mut buf = [0u8; 4];
        assert!(source.read(&mut buf, &cancel).await.is_err());
        assert!(source.prepare(&cancel).await.is_err());
    }
}
