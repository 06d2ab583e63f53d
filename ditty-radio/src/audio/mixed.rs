//! Additive mixer
//!
//! Reads every child concurrently for the same request size and sums the
//! results sample by sample.
//!
//! **Mixing rules:**
//! - result length is the longest child read, rounded down to whole
//!   samples; a child's odd trailing byte is held for its next read
//! - a sample position only takes contributions from children whose read
//!   covered it
//! - samples are summed in the normalized domain and clamped to [-1, 1]
//! - a child that fails contributes silence for that read (cancellation is
//!   still propagated)

use super::source::{AudioSource, BoxedSource, Lifecycle, SourceState};
use super::types::{read_sample, write_sample, HalfSample, BYTES_PER_SAMPLE};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const FULL_SCALE: f32 = i16::MAX as f32;

pub struct MixedSource<S = BoxedSource> {
    children: Vec<S>,
    buffers: Vec<Vec<u8>>,
    halves: Vec<HalfSample>,
    lifecycle: Lifecycle,
}

impl<S: AudioSource> MixedSource<S> {
    pub fn new(children: Vec<S>) -> Self {
        let buffers = children.iter().map(|_| Vec::new()).collect();
        let halves = vec![HalfSample::default(); children.len()];
        Self {
            children,
            buffers,
            halves,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn children(&self) -> &[S] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [S] {
        &mut self.children
    }
}

/// Sum per-child blocks into `out`; returns the mixed length in whole samples
pub fn mix_into(out: &mut [u8], blocks: &[&[u8]]) -> usize {
    let longest = blocks.iter().map(|b| b.len()).max().unwrap_or(0).min(out.len());
    let whole = longest - longest % BYTES_PER_SAMPLE;

    for offset in (0..whole).step_by(BYTES_PER_SAMPLE) {
        let sum: f32 = blocks
            .iter()
            .filter(|block| offset + BYTES_PER_SAMPLE <= block.len())
            .map(|block| f32::from(read_sample(block, offset)) / FULL_SCALE)
            .sum();
        let mixed = (sum.clamp(-1.0, 1.0) * FULL_SCALE) as i16;
        write_sample(out, offset, mixed);
    }
    whole
}

#[async_trait]
impl<S: AudioSource> AudioSource for MixedSource<S> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("MixedSource")? {
            return Ok(());
        }
        let results = join_all(self.children.iter_mut().map(|child| child.prepare(cancel))).await;
        let result = results.into_iter().collect::<Result<Vec<()>>>().map(|_| ());
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("MixedSource")?;

        let len = buf.len();
        for buffer in &mut self.buffers {
            buffer.resize(len, 0);
        }

        let reads = join_all(
            self.children
                .iter_mut()
                .zip(self.buffers.iter_mut())
                .zip(&self.halves)
                .map(|((child, buffer), half)| async move {
                    let held = half.place(buffer);
                    child.read(&mut buffer[held..], cancel).await.map(|read| held + read)
                }),
        )
        .await;

        let mut counts = Vec::with_capacity(reads.len());
        for (index, read) in reads.into_iter().enumerate() {
            match read {
                Ok(count) => counts.push(self.halves[index].settle(&self.buffers[index], count)),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Mix input {} failed, substituting silence: {}", index, e);
                    counts.push(0);
                }
            }
        }

        let blocks: Vec<&[u8]> = self
            .buffers
            .iter()
            .zip(&counts)
            .map(|(buffer, &count)| &buffer[..count])
            .collect();
        Ok(mix_into(buf, &blocks))
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            join_all(self.children.iter_mut().map(|child| child.dispose())).await;
            self.buffers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemorySource;
    use crate::audio::types::{bytes_from_samples, samples_from_bytes};

    #[tokio::test]
    async fn test_all_silent_children_yield_zero() {
        let cancel = CancellationToken::new();
        let mut mix = MixedSource::new(vec![MemorySource::silence(12), MemorySource::silence(12)]);
        mix.prepare(&cancel).await.unwrap();

        let mut buf = vec![0xffu8; 16];
        assert_eq!(mix.read(&mut buf, &cancel).await.unwrap(), 12);
        assert!(buf[..12].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_exhausted_children_yield_nothing() {
        let cancel = CancellationToken::new();
        let mut mix = MixedSource::new(vec![MemorySource::silence(0), MemorySource::silence(0)]);
        mix.prepare(&cancel).await.unwrap();

        let mut buf = vec![0u8; 16];
        assert_eq!(mix.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_odd_child_reads_stay_sample_aligned() {
        let cancel = CancellationToken::new();
        let odd = MemorySource::new(bytes_from_samples(&[100, 200, 300]));
        let mut mix = MixedSource::new(vec![odd, MemorySource::silence(0)]);
        mix.prepare(&cancel).await.unwrap();

        let mut mixed = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let count = mix.read(&mut buf, &cancel).await.unwrap();
            if count == 0 {
                break;
            }
            assert_eq!(count % BYTES_PER_SAMPLE, 0);
            mixed.extend(samples_from_bytes(&buf[..count]));
        }
        assert_eq!(mixed.len(), 3);
        for (got, want) in mixed.iter().zip([100, 200, 300]) {
            assert!((got - want).abs() <= 1, "{} vs {}", got, want);
        }
    }

    #[tokio::test]
    async fn test_sum_and_clamp() {
        let cancel = CancellationToken::new();
        let a = MemorySource::new(bytes_from_samples(&[i16::MAX, 1000, -30_000]));
        let b = MemorySource::new(bytes_from_samples(&[i16::MAX, 500]));
        let mut mix = MixedSource::new(vec![a, b]);
        mix.prepare(&cancel).await.unwrap();

        let mut buf = vec![0u8; 6];
        let count = mix.read(&mut buf, &cancel).await.unwrap();
        assert_eq!(count, 6);
        let samples = samples_from_bytes(&buf[..count]);
        assert_eq!(samples[0], i16::MAX);
        assert!((samples[1] - 1500).abs() <= 1);
        // Only the longer child covers the last position
        assert!((samples[2] + 30_000).abs() <= 1);
    }

    #[test]
    fn test_mix_into_uses_longest_length() {
        let a = bytes_from_samples(&[100]);
        let b = bytes_from_samples(&[100, 200, 300]);
        let mut out = vec![0u8; 8];
        let count = mix_into(&mut out, &[&a, &b]);
        assert_eq!(count, 6);
        // A half sample past the longest whole one is not reported
        assert_eq!(mix_into(&mut out, &[&b[..5]]), 4);
        let samples = samples_from_bytes(&out[..count]);
        assert!((samples[0] - 200).abs() <= 1);
        assert!((samples[2] - 300).abs() <= 1);
    }

    #[tokio::test]
    async fn test_failing_child_is_silence() {
        let cancel = CancellationToken::new();
        let good = MemorySource::new(bytes_from_samples(&[42, 42]));
        // Disposed, so every read fails with InvalidState
        let mut broken = MemorySource::silence(4);
        let mut mix: MixedSource = MixedSource::new(vec![
            Box::new(good) as BoxedSource,
            Box::new(MemorySource::silence(0)) as BoxedSource,
        ]);
        mix.prepare(&cancel).await.unwrap();
        broken.dispose().await;
        mix.children_mut()[1] = Box::new(broken);

        let mut buf = vec![0u8; 4];
        let count = mix.read(&mut buf, &cancel).await.unwrap();
        assert_eq!(count, 4);
        let samples = samples_from_bytes(&buf[..count]);
        assert!((samples[0] - 42).abs() <= 1);
    }
}
