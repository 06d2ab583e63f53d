//! Fully buffered, replayable source
//!
//! Prepare drains the wrapped source into memory; reads then serve the
//! stored bytes and [`MaterializedSource::restart`] rewinds to the start.

use super::source::{AudioSource, Lifecycle, SourceState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DRAIN_CHUNK: usize = 64 * 1024;

pub struct MaterializedSource<S> {
    inner: S,
    data: Vec<u8>,
    position: usize,
    lifecycle: Lifecycle,
}

impl<S: AudioSource> MaterializedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            data: Vec::new(),
            position: 0,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Rewind to the first stored byte
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Total stored bytes (known once prepared)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    async fn drain(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.inner.prepare(cancel).await?;
        let mut chunk = vec![0u8; DRAIN_CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let count = self.inner.read(&mut chunk, cancel).await?;
            if count == 0 {
                break;
            }
            self.data.extend_from_slice(&chunk[..count]);
        }
        debug!("Materialized {} bytes", self.data.len());
        Ok(())
    }
}

#[async_trait]
impl<S: AudioSource> AudioSource for MaterializedSource<S> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("MaterializedSource")? {
            return Ok(());
        }
        self.data.clear();
        let result = self.drain(cancel).await;
        if result.is_err() {
            self.data.clear();
        }
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], _cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("MaterializedSource")?;
        let count = buf.len().min(self.data.len() - self.position);
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.data = Vec::new();
            self.position = 0;
            self.inner.dispose().await;
        }
    }
}
