//! Error types for ditty-radio
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for ditty-radio
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted outside its legal lifecycle phase
    ///
    /// Always a contract violation; never retried.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cancellation was signalled while suspended
    #[error("Operation cancelled")]
    Cancelled,

    /// File or pipe I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External transcoder process errors
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Text-to-speech synthesis errors
    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    /// Voice sink or gateway connection errors (fatal to a channel session)
    #[error("Voice sink error: {0}")]
    Sink(String),

    /// Speech recognizer errors
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Storage query errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from ditty-common
    #[error(transparent)]
    Common(#[from] ditty_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True if this failure ends the owning channel session
    ///
    /// Sink failures stop the session (and trigger its disconnect path);
    /// everything else is logged and retried by the governing loop.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Error::Sink(_) | Error::InvalidState(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Convenience Result type using ditty-radio Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_errors_are_fatal() {
        assert!(Error::Sink("closed".to_string()).is_fatal_to_session());
        assert!(!Error::Transcode("exit 1".to_string()).is_fatal_to_session());
        assert!(!Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_fatal_to_session());
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Internal("x".to_string()).is_cancelled());
    }
}
