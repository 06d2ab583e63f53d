//! Core PCM data types
//!
//! All audio in the station is interleaved 16-bit signed little-endian PCM.
//! Frames carry no format metadata; each pipeline tracks its [`PcmFormat`]
//! out of band.

use std::time::Duration;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Transcoder output and sink input rate (Hz)
pub const STATION_SAMPLE_RATE: u32 = 48_000;

/// Default bytes per sink frame: 20 ms of 48 kHz stereo s16le
pub const DEFAULT_FRAME_BYTES: usize = 3840;

/// Sample rate and channel count of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// 48 kHz interleaved stereo, the station's working format
    pub const STATION: PcmFormat = PcmFormat {
        sample_rate: STATION_SAMPLE_RATE,
        channels: 2,
    };

    /// 48 kHz mono, the recognizer's input format
    pub const MONO_48K: PcmFormat = PcmFormat {
        sample_rate: STATION_SAMPLE_RATE,
        channels: 1,
    };

    /// Bytes per interleaved frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Byte length of `duration`, rounded down to a whole frame
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (duration.as_micros() * self.sample_rate as u128 / 1_000_000) as usize;
        frames * self.bytes_per_frame()
    }

    /// Playing time of `bytes`
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame();
        Duration::from_micros(frames as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

/// Read the sample starting at byte `offset`
#[inline]
pub fn read_sample(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Write `sample` at byte `offset`
#[inline]
pub fn write_sample(buf: &mut [u8], offset: usize, sample: i16) {
    let [lo, hi] = sample.to_le_bytes();
    buf[offset] = lo;
    buf[offset + 1] = hi;
}

/// Trailing half sample held back between reads
///
/// Sources may return odd byte counts. Stages that work per sample place the
/// held byte in front of the next read and only pass on whole samples.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HalfSample(Option<u8>);

impl HalfSample {
    pub fn is_held(&self) -> bool {
        self.0.is_some()
    }

    /// Copy the held byte to the front of `buf`; returns bytes placed
    pub fn place(&self, buf: &mut [u8]) -> usize {
        match (self.0, buf.first_mut()) {
            (Some(byte), Some(slot)) => {
                *slot = byte;
                1
            }
            _ => 0,
        }
    }

    /// Round `count` bytes of `buf` down to whole samples, holding the rest
    pub fn settle(&mut self, buf: &[u8], count: usize) -> usize {
        let whole = count - count % BYTES_PER_SAMPLE;
        self.0 = (whole < count).then(|| buf[whole]);
        whole
    }
}

/// Decode whole samples from a byte block (a trailing odd byte is ignored)
pub fn samples_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as a byte block
pub fn bytes_from_samples(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
