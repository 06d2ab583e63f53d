//! Voice sink that records what a session writes

use async_trait::async_trait;
use ditty_radio::audio::types::read_sample;
use ditty_radio::audio::VoiceSink;
use ditty_radio::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SinkLog {
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub flushes: usize,
    pub closes: usize,
}

impl SinkLog {
    /// Samples written so far that are not silent
    pub fn audible_samples(&self) -> usize {
        (0..self.bytes.len() / 2)
            .filter(|i| read_sample(&self.bytes, i * 2) != 0)
            .count()
    }
}

/// Sink pacing each write by a short sleep
#[derive(Clone)]
pub struct RecordingSink {
    frame_size: usize,
    log: Arc<Mutex<SinkLog>>,
    /// Fail every write after this many
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            log: Arc::new(Mutex::new(SinkLog::default())),
            fail_after: None,
        }
    }

    pub fn failing_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SinkLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl VoiceSink for RecordingSink {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut log = self.log.lock().unwrap();
        if self.fail_after.is_some_and(|limit| log.writes >= limit) {
            return Err(Error::Sink("connection lost".to_string()));
        }
        log.bytes.extend_from_slice(frame);
        log.writes += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.log.lock().unwrap().flushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}
