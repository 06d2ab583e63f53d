//! Voice gateway seam
//!
//! The station reaches the voice platform only through [`VoiceGateway`]:
//! connecting an output sink, enumerating channel members, and opening a
//! member's incoming audio.
//!
//! [`LocalGateway`] is the built-in implementation: it encodes the channel
//! mix to a file or URL through ffmpeg and reports no members.

use crate::audio::output::{EncoderSink, VoiceSink};
use crate::audio::source::BoxedSource;
use crate::audio::types::PcmFormat;
use crate::error::Result;
use async_trait::async_trait;
use ditty_common::{ChannelId, ListenerId};
use std::path::PathBuf;
use tracing::info;

/// A member present in a voice channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: ListenerId,
    pub display_name: String,
    pub is_bot: bool,
    pub roles: Vec<u64>,
}

impl Member {
    pub fn has_role(&self, role: u64) -> bool {
        self.roles.contains(&role)
    }
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join `channel` and return its output sink
    async fn connect(&self, channel: ChannelId) -> Result<Box<dyn VoiceSink>>;

    /// Members currently in `channel`
    async fn members(&self, channel: ChannelId) -> Result<Vec<Member>>;

    /// Incoming 48 kHz stereo audio of `listener`, if available
    async fn listen(&self, channel: ChannelId, listener: ListenerId) -> Result<Option<BoxedSource>>;
}

/// Gateway that streams the mix into a local ffmpeg encoder
#[derive(Debug, Clone)]
pub struct LocalGateway {
    program: PathBuf,
    output: String,
    frame_size: usize,
}

impl LocalGateway {
    pub fn new(program: impl Into<PathBuf>, output: impl Into<String>, frame_size: usize) -> Self {
        Self {
            program: program.into(),
            output: output.into(),
            frame_size,
        }
    }
}

#[async_trait]
impl VoiceGateway for LocalGateway {
    async fn connect(&self, channel: ChannelId) -> Result<Box<dyn VoiceSink>> {
        info!("Channel {} streaming to {}", channel, self.output);
        let sink = EncoderSink::spawn(&self.program, &self.output, PcmFormat::STATION, self.frame_size)?;
        Ok(Box::new(sink))
    }

    async fn members(&self, _channel: ChannelId) -> Result<Vec<Member>> {
        Ok(Vec::new())
    }

    async fn listen(&self, _channel: ChannelId, _listener: ListenerId) -> Result<Option<BoxedSource>> {
        Ok(None)
    }
}
