//! In-process song store

use super::SongStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use ditty_common::{ChannelId, PlayRecord, Song, SongId};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    songs: RwLock<Vec<Song>>,
    /// Oldest first; refreshed records move to the back
    history: RwLock<Vec<PlayRecord>>,
    /// Oldest first
    requests: RwLock<Vec<(ChannelId, SongId)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_songs(songs: Vec<Song>) -> Self {
        Self {
            songs: RwLock::new(songs),
            ..Self::default()
        }
    }

    pub async fn upsert_song(&self, song: Song) {
        let mut songs = self.songs.write().await;
        match songs.iter_mut().find(|s| s.id == song.id) {
            Some(existing) => *existing = song,
            None => songs.push(song),
        }
    }
}

#[async_trait]
impl SongStore for MemoryStore {
    async fn ready_songs(&self) -> Result<Vec<Song>> {
        Ok(self
            .songs
            .read()
            .await
            .iter()
            .filter(|song| song.is_ready())
            .cloned()
            .collect())
    }

    async fn song(&self, id: &SongId) -> Result<Option<Song>> {
        Ok(self.songs.read().await.iter().find(|s| &s.id == id).cloned())
    }

    async fn play_history(&self, channel: ChannelId) -> Result<Vec<PlayRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .rev()
            .filter(|record| record.channel_id == channel)
            .cloned()
            .collect())
    }

    async fn record_play(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        let mut history = self.history.write().await;
        history.retain(|record| !(record.channel_id == channel && &record.song_id == song));
        history.push(PlayRecord {
            channel_id: channel,
            song_id: song.clone(),
            last_played: Utc::now(),
        });
        Ok(())
    }

    async fn enqueue_request(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        self.requests.write().await.push((channel, song.clone()));
        Ok(())
    }

    async fn pending_requests(&self, channel: ChannelId) -> Result<Vec<SongId>> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, song)| song.clone())
            .collect())
    }

    async fn complete_request(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        let mut requests = self.requests.write().await;
        if let Some(pos) = requests.iter().position(|(ch, id)| *ch == channel && id == song) {
            requests.remove(pos);
        }
        Ok(())
    }
}
