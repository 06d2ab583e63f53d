//! Voice output sinks
//!
//! A [`VoiceSink`] accepts fixed-size PCM frames from a channel session and
//! paces the session: `write` suspends until the sink can take the frame.
//!
//! **Local output:** [`EncoderSink`] pipes frames into an ffmpeg encoder
//! reading stdin at native rate (`-re`), so writes proceed in real time.

use super::types::PcmFormat;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

/// Destination for encoded voice audio
#[async_trait]
pub trait VoiceSink: Send {
    /// Bytes per frame this sink expects
    fn frame_size(&self) -> usize;

    /// Submit one frame; not cancellable once started
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;

    /// Finish output and disconnect; idempotent
    async fn close(&mut self) -> Result<()>;
}

/// Encoder arguments for reading raw PCM from stdin into `output`
pub fn encoder_args(output: &str, format: PcmFormat) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "panic".to_string(),
        "-re".to_string(),
        "-ac".to_string(),
        format.channels.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-y".to_string(),
        output.to_string(),
    ]
}

/// Voice sink that streams into a child ffmpeg encoder
pub struct EncoderSink {
    output: String,
    frame_size: usize,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl EncoderSink {
    /// Spawn the encoder writing to `output` (file path or URL)
    pub fn spawn(program: &Path, output: &str, format: PcmFormat, frame_size: usize) -> Result<Self> {
        let mut child = Command::new(program)
            .args(encoder_args(output, format))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Sink(format!("Failed to start encoder {}: {}", program.display(), e)))?;
        let stdin = child.stdin.take();
        info!("Encoder sink started for {}", output);
        Ok(Self {
            output: output.to_string(),
            frame_size,
            child: Some(child),
            stdin,
        })
    }
}

#[async_trait]
impl VoiceSink for EncoderSink {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Sink(format!("Encoder for {} is closed", self.output)))?;
        stdin
            .write_all(frame)
            .await
            .map_err(|e| Error::Sink(format!("Encoder write failed: {}", e)))
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin
                .flush()
                .await
                .map_err(|e| Error::Sink(format!("Encoder flush failed: {}", e)))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Closing stdin lets the encoder finalize its output
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Encoder for {} finished", self.output),
                Ok(status) => warn!("Encoder for {} exited with {}", self.output, status),
                Err(e) => return Err(Error::Sink(format!("Failed to reap encoder: {}", e))),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_args_read_stdin_at_native_rate() {
        let args = encoder_args("out.ogg", PcmFormat::STATION);
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "pipe:0");
        assert!(args.iter().position(|a| a == "-re").unwrap() < input);
        assert_eq!(args.last().unwrap(), "out.ogg");
    }

    #[tokio::test]
    async fn test_missing_encoder_is_sink_error() {
        let result = EncoderSink::spawn(
            Path::new("/nonexistent/ffmpeg-binary"),
            "out.ogg",
            PcmFormat::STATION,
            3840,
        );
        assert!(matches!(result, Err(Error::Sink(_))));
    }
}
