//! Text-to-speech clips
//!
//! A [`SpeechSource`] runs the configured synthesizer command on prepare,
//! writing a scratch WAV file, then streams that file through the
//! transcoder. The scratch file is deleted on dispose.
//!
//! Synthesis failures are logged and the clip plays as empty.

use super::source::{cancellable, AudioSource, BoxedSource, Lifecycle, SourceState};
use super::transcode::Transcoder;
use crate::error::{Error, Result};
use async_trait::async_trait;
use ditty_common::config::TtsConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const FILENAME_PLACEHOLDER: &str = "{{FILENAME}}";
const TEXT_PLACEHOLDER: &str = "{{TEXT}}";

/// Produces spoken announcements as audio sources
pub trait Synthesizer: Send + Sync {
    fn speak(&self, text: &str) -> BoxedSource;
}

/// [`Synthesizer`] that shells out to a command-line TTS engine
pub struct CommandSynthesizer {
    config: TtsConfig,
    transcoder: Arc<dyn Transcoder>,
}

impl CommandSynthesizer {
    pub fn new(config: TtsConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { config, transcoder }
    }

    /// Delete leftover clips from a previous run
    pub async fn clear_scratch(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.config.scratch_dir).await {
            Ok(()) => {
                debug!("Cleared TTS scratch dir {}", self.config.scratch_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn speak(&self, text: &str) -> BoxedSource {
        Box::new(SpeechSource::new(
            text,
            self.config.clone(),
            self.transcoder.clone(),
        ))
    }
}

pub struct SpeechSource {
    text: String,
    config: TtsConfig,
    transcoder: Arc<dyn Transcoder>,
    wav_path: Option<PathBuf>,
    inner: Option<BoxedSource>,
    lifecycle: Lifecycle,
}

impl SpeechSource {
    pub fn new(text: &str, config: TtsConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            text: text.to_string(),
            config,
            transcoder,
            wav_path: None,
            inner: None,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    async fn synthesize(&mut self, cancel: &CancellationToken) -> Result<()> {
        let scratch = absolute(&self.config.scratch_dir)?;
        tokio::fs::create_dir_all(&scratch).await?;
        let wav_path = scratch.join(format!("{}.wav", Uuid::new_v4()));
        self.wav_path = Some(wav_path.clone());

        let args = expand_template(&self.config.arg_template, &wav_path, &self.text)?;
        let mut command = Command::new(&self.config.executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        debug!("Synthesizing {:?}", self.text);
        let status = cancellable(cancel, command.status())
            .await?
            .map_err(|e| Error::Synthesis(format!("Failed to start {}: {}", self.config.executable, e)))?;
        if !status.success() {
            return Err(Error::Synthesis(format!(
                "{} exited with {}",
                self.config.executable, status
            )));
        }

        let mut inner = self.transcoder.open(&wav_path);
        inner.prepare(cancel).await?;
        self.inner = Some(inner);
        Ok(())
    }
}

#[async_trait]
impl AudioSource for SpeechSource {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.begin_prepare("SpeechSource")? {
            return Ok(());
        }
        let result = match self.synthesize(cancel).await {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!("Speech synthesis failed for {:?}: {}", self.text, e);
                self.inner = None;
                Ok(())
            }
            Ok(()) => Ok(()),
        };
        self.lifecycle.finish_prepare(&result);
        result
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("SpeechSource")?;
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf, cancel).await,
            None => Ok(0),
        }
    }

    async fn dispose(&mut self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        if let Some(mut inner) = self.inner.take() {
            inner.dispose().await;
        }
        if let Some(path) = self.wav_path.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Substitute placeholders into the template and split it into arguments
pub fn expand_template(template: &str, wav_path: &Path, text: &str) -> Result<Vec<String>> {
    let line = template
        .replace(FILENAME_PLACEHOLDER, &quote(&wav_path.display().to_string()))
        .replace(TEXT_PLACEHOLDER, &quote(text));
    split_args(&line)
}

/// Split a command line on whitespace, honoring double quotes and backslash escapes
pub fn split_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => {
                    current.push(next);
                    in_arg = true;
                }
                None => current.push('\\'),
            },
            '"' => {
                quoted = !quoted;
                in_arg = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if quoted {
        return Err(Error::Config(format!("Unterminated quote in {:?}", line)));
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
