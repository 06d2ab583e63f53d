//! Gain stage
//!
//! Scales every 16-bit sample of the wrapped source by a fixed factor.
//! Results beyond the i16 range saturate at i16::MIN / i16::MAX; fractional
//! results truncate toward zero. Reads return whole samples only; an odd
//! trailing byte from the inner source is held for the next read.

use super::source::{AudioSource, Lifecycle, SourceState};
use super::types::{HalfSample, BYTES_PER_SAMPLE};
use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Multiplies each sample of `inner` by `volume`
pub struct VolumeSource<S> {
    inner: S,
    volume: f32,
    half: HalfSample,
    lifecycle: Lifecycle,
}

impl<S: AudioSource> VolumeSource<S> {
    pub fn new(inner: S, volume: f32) -> Self {
        Self {
            inner,
            volume,
            half: HalfSample::default(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Apply `volume` in place to every whole sample of `block`
pub fn apply_volume(block: &mut [u8], volume: f32) {
    for pair in block.chunks_exact_mut(BYTES_PER_SAMPLE) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        // float-to-int `as` saturates
        let scaled = (f32::from(sample) * volume) as i16;
        pair.copy_from_slice(&scaled.to_le_bytes());
    }
}

#[async_trait]
impl<S: AudioSource> AudioSource for VolumeSource<S> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("VolumeSource")? {
            return Ok(());
        }
        let result = self.inner.prepare(cancel).await;
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("VolumeSource")?;
        let held = self.half.place(buf);
        let read = self.inner.read(&mut buf[held..], cancel).await?;
        let count = self.half.settle(buf, held + read);
        apply_volume(&mut buf[..count], self.volume);
        Ok(count)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.inner.dispose().await;
        }
    }
}
