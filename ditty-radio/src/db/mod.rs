//! Song catalog and play-history storage
//!
//! The station reads the catalog and history through [`SongStore`] and only
//! ever writes play records and song requests. Requests stay persisted until
//! the channel that queued them plays them.
//!
//! - [`SqliteStore`]: sqlx-backed store used by the binary
//! - [`MemoryStore`]: in-process store for tests and local experiments

pub mod init;
pub mod memory;
pub mod songs;

pub use memory::MemoryStore;
pub use songs::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use ditty_common::{ChannelId, PlayRecord, Song, SongId};

#[async_trait]
pub trait SongStore: Send + Sync {
    /// Approved songs with downloaded audio, in catalog order
    async fn ready_songs(&self) -> Result<Vec<Song>>;

    async fn song(&self, id: &SongId) -> Result<Option<Song>>;

    /// Play records for `channel`, most recent first
    async fn play_history(&self, channel: ChannelId) -> Result<Vec<PlayRecord>>;

    /// Insert or refresh the (channel, song) record with the current time
    async fn record_play(&self, channel: ChannelId, song: &SongId) -> Result<()>;

    /// Persist an explicit play request for `channel`
    async fn enqueue_request(&self, channel: ChannelId, song: &SongId) -> Result<()>;

    /// Requests for `channel` not yet played, oldest first
    async fn pending_requests(&self, channel: ChannelId) -> Result<Vec<SongId>>;

    /// Drop the oldest pending request of `song` on `channel`
    async fn complete_request(&self, channel: ChannelId, song: &SongId) -> Result<()>;
}
