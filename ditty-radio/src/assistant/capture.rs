//! Utterance capture after a wake-word trigger
//!
//! Reads blocks from the listener's mono stream until the speaker pauses.
//!
//! **Bounds:**
//! - waiting for the first block is limited to `max_utterance`
//! - once audio arrives, a read that yields nothing for `silence_gap` ends
//!   the utterance
//! - the whole utterance is capped at `max_utterance` from its first block
//!
//! Capture runs to one of those bounds; it is not cut short by session
//! cancellation.

use crate::audio::source::AudioSource;
use crate::error::Result;
use ditty_common::config::RecognizerConfig;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Capture block: 20 ms of 48 kHz mono
pub const CAPTURE_BLOCK_BYTES: usize = 1920;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub max_utterance: Duration,
    pub silence_gap: Duration,
    pub block_bytes: usize,
}

impl From<&RecognizerConfig> for CaptureSettings {
    fn from(config: &RecognizerConfig) -> Self {
        Self {
            max_utterance: config.max_utterance(),
            silence_gap: config.silence_gap(),
            block_bytes: CAPTURE_BLOCK_BYTES,
        }
    }
}

pub async fn capture_utterance<S>(source: &mut S, settings: &CaptureSettings) -> Result<Vec<u8>>
where
    S: AudioSource + ?Sized,
{
    let uncancelled = CancellationToken::new();
    let mut block = vec![0u8; settings.block_bytes.max(2)];
    let mut audio = Vec::new();
    let started = Instant::now();
    let mut first_block: Option<Instant> = None;

    loop {
        let wait = match first_block {
            None => settings.max_utterance.saturating_sub(started.elapsed()),
            Some(at) => settings
                .silence_gap
                .min(settings.max_utterance.saturating_sub(at.elapsed())),
        };
        if wait.is_zero() {
            break;
        }
        match timeout(wait, source.read(&mut block, &uncancelled)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(count)) => {
                audio.extend_from_slice(&block[..count]);
                first_block.get_or_insert_with(Instant::now);
            }
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemorySource;
    use crate::audio::stream::StreamSource;
    use tokio::io::AsyncWriteExt;

    fn settings(max_ms: u64, gap_ms: u64) -> CaptureSettings {
        CaptureSettings {
            max_utterance: Duration::from_millis(max_ms),
            silence_gap: Duration::from_millis(gap_ms),
            block_bytes: 4,
        }
    }

    #[tokio::test]
    async fn test_capture_until_stream_ends() {
        let cancel = CancellationToken::new();
        let mut source = MemorySource::new(vec![1u8; 10]);
        source.prepare(&cancel).await.unwrap();
        let audio = capture_utterance(&mut source, &settings(1000, 100)).await.unwrap();
        assert_eq!(audio.len(), 10);
    }

    #[tokio::test]
    async fn test_silence_gap_ends_capture() {
        let cancel = CancellationToken::new();
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut source = StreamSource::new(rx);
        source.prepare(&cancel).await.unwrap();
        tx.write_all(&[5u8; 8]).await.unwrap();

        let started = std::time::Instant::now();
        let audio = capture_utterance(&mut source, &settings(5000, 50)).await.unwrap();
        assert_eq!(audio, vec![5u8; 8]);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test]
    async fn test_no_speech_waits_at_most_max_utterance() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = tokio::io::duplex(64);
        let mut source = StreamSource::new(rx);
        source.prepare(&cancel).await.unwrap();

        let audio = capture_utterance(&mut source, &settings(60, 20)).await.unwrap();
        assert!(audio.is_empty());
    }
}
