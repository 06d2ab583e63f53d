//! Sample-rate reduction by nearest-sample decimation
//!
//! Treats the inner stream as a sequence of 16-bit samples with no channel
//! awareness. Output sample `k` copies input sample `floor(k * in / out)`.
//! Interleaved stereo at 48 kHz read as 96 kHz mono therefore decimates to
//! its left channel at 48 kHz.
//!
//! No filtering is applied; the only consumer is speech detection.

use super::source::{AudioSource, Lifecycle, SourceState};
use super::types::BYTES_PER_SAMPLE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct DownsampleSource<S> {
    inner: S,
    input_rate: u32,
    output_rate: u32,
    scratch: Vec<u8>,
    /// Odd trailing byte from the previous inner read
    carry: Option<u8>,
    lifecycle: Lifecycle,
}

impl<S: AudioSource> DownsampleSource<S> {
    pub fn new(inner: S, input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::Config(format!(
                "Invalid downsample rates {} -> {}",
                input_rate, output_rate
            )));
        }
        Ok(Self {
            inner,
            input_rate,
            output_rate,
            scratch: Vec::new(),
            carry: None,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Input samples consumed per output sample
    pub fn ratio(&self) -> f64 {
        self.input_rate as f64 / self.output_rate as f64
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Drop any partial sample carried between reads (after the inner source seeks)
    pub fn reset(&mut self) {
        self.carry = None;
    }
}

#[async_trait]
impl<S: AudioSource> AudioSource for DownsampleSource<S> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("DownsampleSource")? {
            return Ok(());
        }
        let result = self.inner.prepare(cancel).await;
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("DownsampleSource")?;

        let max_out = buf.len() / BYTES_PER_SAMPLE;
        if max_out == 0 {
            return Ok(0);
        }
        let ratio = self.ratio();
        let needed = (max_out as f64 * ratio).ceil() as usize * BYTES_PER_SAMPLE;
        self.scratch.resize(needed.max(BYTES_PER_SAMPLE), 0);

        let mut filled = 0;
        let carried = self.carry.take();
        if let Some(byte) = carried {
            self.scratch[0] = byte;
            filled = 1;
        }

        // One inner read, repeated only until a whole sample is available
        while filled < BYTES_PER_SAMPLE {
            let limit = self.scratch.len();
            let count = match self.inner.read(&mut self.scratch[filled..limit], cancel).await {
                Ok(count) => count,
                Err(e) => {
                    if filled == 1 {
                        self.carry = carried;
                    }
                    return Err(e);
                }
            };
            if count == 0 {
                break;
            }
            filled += count;
        }

        let whole = filled / BYTES_PER_SAMPLE;
        if filled % BYTES_PER_SAMPLE == 1 {
            self.carry = Some(self.scratch[filled - 1]);
        }

        let mut produced = 0;
        while produced < max_out {
            let source_index = (produced as f64 * ratio) as usize;
            if source_index >= whole {
                break;
            }
            let from = source_index * BYTES_PER_SAMPLE;
            let to = produced * BYTES_PER_SAMPLE;
            buf[to..to + BYTES_PER_SAMPLE].copy_from_slice(&self.scratch[from..from + BYTES_PER_SAMPLE]);
            produced += 1;
        }

        Ok(produced * BYTES_PER_SAMPLE)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.scratch = Vec::new();
            self.carry = None;
            self.inner.dispose().await;
        }
    }
}
