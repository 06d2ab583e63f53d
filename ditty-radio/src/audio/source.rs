//! The audio source contract
//!
//! Every producer of PCM in the station (files, speech, listener streams,
//! decorators, tracks, the channel mix) implements [`AudioSource`].
//!
//! **Lifecycle:** Uninitialized → Preparing → Ready → Disposed
//! - `prepare` is idempotent: a call while Preparing or Ready is a no-op
//! - `read` is only legal while Ready
//! - after `dispose`, both `prepare` and `read` fail with `InvalidState`
//!
//! **Reads:** `read` fills at most `buf.len()` bytes. A short read is normal;
//! only a 0-byte read means the source has permanently ended.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of an audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Uninitialized,
    Preparing,
    Ready,
    Disposed,
}

/// A preparable, readable unit of PCM audio
///
/// Suspending calls take the caller's cancellation token and return
/// [`Error::Cancelled`] promptly when it fires.
#[async_trait]
pub trait AudioSource: Send {
    /// Current lifecycle state
    fn state(&self) -> SourceState;

    /// Perform one-time setup; safe to call more than once
    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Fill `buf` with up to `buf.len()` bytes, returning the count
    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize>;

    /// Release resources (and those of wrapped sources); idempotent
    async fn dispose(&mut self);

    fn is_ready(&self) -> bool {
        self.state() == SourceState::Ready
    }
}

/// Type-erased source, as stored in playlists and mixes
pub type BoxedSource = Box<dyn AudioSource>;

#[async_trait]
impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn state(&self) -> SourceState {
        (**self).state()
    }

    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        (**self).prepare(cancel).await
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        (**self).read(buf, cancel).await
    }

    async fn dispose(&mut self) {
        (**self).dispose().await
    }
}

/// Lifecycle bookkeeping shared by every source implementation
///
/// Implementations call [`Lifecycle::begin_prepare`] first and only run their
/// setup when it returns `true`, then report the outcome with
/// [`Lifecycle::finish_prepare`].
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: SourceState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lifecycle that starts Ready (sources with no setup)
    pub fn ready() -> Self {
        Self {
            state: SourceState::Ready,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Returns true if the caller should run its setup now
    pub fn begin_prepare(&mut self, source: &str) -> Result<bool> {
        match self.state {
            SourceState::Uninitialized => {
                self.state = SourceState::Preparing;
                Ok(true)
            }
            SourceState::Preparing | SourceState::Ready => Ok(false),
            SourceState::Disposed => Err(Error::InvalidState(format!(
                "{}: cannot prepare a disposed source",
                source
            ))),
        }
    }

    /// Ready on success; back to Uninitialized on failure so prepare can be retried
    pub fn finish_prepare<T>(&mut self, result: &Result<T>) {
        if self.state == SourceState::Preparing {
            self.state = if result.is_ok() {
                SourceState::Ready
            } else {
                SourceState::Uninitialized
            };
        }
    }

    pub fn ensure_readable(&self, source: &str) -> Result<()> {
        match self.state {
            SourceState::Ready => Ok(()),
            SourceState::Disposed => Err(Error::InvalidState(format!(
                "{}: read after dispose",
                source
            ))),
            state => Err(Error::InvalidState(format!(
                "{}: read while {:?}",
                source, state
            ))),
        }
    }

    /// Returns true the first time; later calls are no-ops
    pub fn begin_dispose(&mut self) -> bool {
        if self.state == SourceState::Disposed {
            false
        } else {
            self.state = SourceState::Disposed;
            true
        }
    }
}

/// Await `future` unless `cancel` fires first
pub async fn cancellable<F>(cancel: &CancellationToken, future: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_is_idempotent() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_prepare("test").unwrap());
        assert_eq!(lifecycle.state(), SourceState::Preparing);

        // Second call while preparing is a no-op
        assert!(!lifecycle.begin_prepare("test").unwrap());

        lifecycle.finish_prepare(&Ok(()));
        assert_eq!(lifecycle.state(), SourceState::Ready);
        assert!(!lifecycle.begin_prepare("test").unwrap());
    }

    #[test]
    fn test_failed_prepare_can_retry() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_prepare("test").unwrap());
        lifecycle.finish_prepare::<()>(&Err(Error::Transcode("boom".to_string())));
        assert_eq!(lifecycle.state(), SourceState::Uninitialized);
        assert!(lifecycle.begin_prepare("test").unwrap());
    }

    #[test]
    fn test_read_requires_ready() {
        let mut lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.ensure_readable("test"),
            Err(Error::InvalidState(_))
        ));
        lifecycle.begin_prepare("test").unwrap();
        lifecycle.finish_prepare(&Ok(()));
        assert!(lifecycle.ensure_readable("test").is_ok());
    }

    #[test]
    fn test_disposed_rejects_everything() {
        let mut lifecycle = Lifecycle::ready();
        assert!(lifecycle.begin_dispose());
        assert!(!lifecycle.begin_dispose());
        assert!(lifecycle.begin_prepare("test").is_err());
        assert!(lifecycle.ensure_readable("test").is_err());
    }

    #[tokio::test]
    async fn test_cancellable_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, std::future::pending::<()>()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_output() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { 7 }).await.unwrap();
        assert_eq!(result, 7);
    }
}
