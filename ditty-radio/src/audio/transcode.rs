//! Media file decoding through an external ffmpeg process
//!
//! **Pipeline:** `ffmpeg -i <file> -ac 2 -f s16le -ar 48000 pipe:1`, with the
//! child's stdout read as the source's PCM stream. The child is spawned on
//! prepare and killed on dispose (or when the source is dropped).

use super::source::{cancellable, AudioSource, BoxedSource, Lifecycle, SourceState};
use super::types::PcmFormat;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Opens media files as PCM sources in the station format
pub trait Transcoder: Send + Sync {
    fn open(&self, path: &Path) -> BoxedSource;
}

/// [`Transcoder`] backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    format: PcmFormat,
    /// Base for relative song paths
    media_dir: Option<PathBuf>,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            format: PcmFormat::STATION,
            media_dir: None,
        }
    }

    pub fn with_format(mut self, format: PcmFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = Some(dir.into());
        self
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.media_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn open(&self, path: &Path) -> BoxedSource {
        Box::new(FfmpegSource::new(&self.program, &self.resolve(path), self.format))
    }
}

/// Decoder arguments for reading `input` as raw PCM on stdout
pub fn decode_args(input: &Path, format: PcmFormat) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "panic".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-ac".to_string(),
        format.channels.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "pipe:1".to_string(),
    ]
}

/// One media file decoded by a child ffmpeg process
pub struct FfmpegSource {
    program: PathBuf,
    input: PathBuf,
    format: PcmFormat,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    lifecycle: Lifecycle,
}

impl FfmpegSource {
    pub fn new(program: &Path, input: &Path, format: PcmFormat) -> Self {
        Self {
            program: program.to_path_buf(),
            input: input.to_path_buf(),
            format,
            child: None,
            stdout: None,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    fn spawn(&mut self) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(decode_args(&self.input, self.format))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transcode(format!(
                    "Failed to start {} for {}: {}",
                    self.program.display(),
                    self.input.display(),
                    e
                ))
            })?;
        self.stdout = child.stdout.take();
        self.child = Some(child);
        debug!("Transcoder started for {}", self.input.display());
        Ok(())
    }

    async fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Transcoder for {} already exited: {}", self.input.display(), e);
            }
        }
    }
}

#[async_trait]
impl AudioSource for FfmpegSource {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("FfmpegSource")? {
            return Ok(());
        }
        let result = self.spawn();
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("FfmpegSource")?;
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(0);
        };
        let count = cancellable(cancel, stdout.read(buf)).await??;
        if count == 0 {
            self.stdout = None;
            if let Some(child) = self.child.as_mut() {
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        warn!("Transcoder for {} exited with {}", self.input.display(), status)
                    }
                    Ok(_) => debug!("Transcoder finished {}", self.input.display()),
                    Err(e) => warn!("Failed to reap transcoder: {}", e),
                }
            }
            self.child = None;
        }
        Ok(count)
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.stdout = None;
            self.reap().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_against_media_dir() {
        let transcoder = FfmpegTranscoder::default().with_media_dir("/srv/audio");
        assert_eq!(transcoder.resolve(Path::new("abc.ogg")), PathBuf::from("/srv/audio/abc.ogg"));
        assert_eq!(transcoder.resolve(Path::new("/music/x.mp3")), PathBuf::from("/music/x.mp3"));
        assert_eq!(FfmpegTranscoder::default().resolve(Path::new("abc.ogg")), PathBuf::from("abc.ogg"));
    }

    #[test]
    fn test_decode_args() {
        let args = decode_args(Path::new("/music/a b.mp3"), PcmFormat::STATION);
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-loglevel",
                "panic",
                "-i",
                "/music/a b.mp3",
                "-ac",
                "2",
                "-f",
                "s16le",
                "-ar",
                "48000",
                "pipe:1"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_fails_prepare() {
        let cancel = CancellationToken::new();
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary");
        let mut source = transcoder.open(Path::new("song.mp3"));
        let result = source.prepare(&cancel).await;
        assert!(matches!(result, Err(Error::Transcode(_))));
        assert_eq!(source.state(), SourceState::Uninitialized);
    }
}
