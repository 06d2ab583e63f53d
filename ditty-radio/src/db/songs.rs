//! SQLite-backed song store

use super::init;
use super::SongStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ditty_common::{ChannelId, PlayRecord, Song, SongId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(init::open_database(db_path).await?))
    }

    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(init::open_in_memory().await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a catalog entry
    pub async fn upsert_song(&self, song: &Song) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO songs (id, title, url, flair, approved, audio_path)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                flair = excluded.flair,
                approved = excluded.approved,
                audio_path = excluded.audio_path
            "#,
        )
        .bind(song.id.as_str())
        .bind(&song.title)
        .bind(&song.url)
        .bind(&song.flair)
        .bind(song.approved)
        .bind(song.audio_path.as_ref().map(|p| p.display().to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn song_from_row(row: &SqliteRow) -> Song {
    let audio_path: Option<String> = row.get("audio_path");
    Song {
        id: SongId(row.get("id")),
        title: row.get("title"),
        url: row.get("url"),
        flair: row.get("flair"),
        approved: row.get::<i64, _>("approved") != 0,
        audio_path: audio_path.filter(|p| !p.is_empty()).map(PathBuf::from),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<PlayRecord> {
    let millis: i64 = row.get("last_played_ms");
    let last_played = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Internal(format!("Invalid play timestamp {}", millis)))?;
    Ok(PlayRecord {
        channel_id: ChannelId(row.get::<i64, _>("channel_id") as u64),
        song_id: SongId(row.get("song_id")),
        last_played,
    })
}

#[async_trait]
impl SongStore for SqliteStore {
    async fn ready_songs(&self) -> Result<Vec<Song>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, url, flair, approved, audio_path
            FROM songs
            WHERE approved = 1 AND audio_path IS NOT NULL AND audio_path != ''
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(song_from_row).collect())
    }

    async fn song(&self, id: &SongId) -> Result<Option<Song>> {
        let row = sqlx::query(
            "SELECT id, title, url, flair, approved, audio_path FROM songs WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(song_from_row))
    }

    async fn play_history(&self, channel: ChannelId) -> Result<Vec<PlayRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, song_id, last_played_ms
            FROM play_history
            WHERE channel_id = ?
            ORDER BY last_played_ms DESC, seq DESC
            "#,
        )
        .bind(channel.0 as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn record_play(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO play_history (channel_id, song_id, last_played_ms, seq)
            VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM play_history))
            ON CONFLICT(channel_id, song_id) DO UPDATE SET
                last_played_ms = excluded.last_played_ms,
                seq = excluded.seq
            "#,
        )
        .bind(channel.0 as i64)
        .bind(song.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!("Recorded play of {} on channel {}", song, channel);
        Ok(())
    }

    async fn enqueue_request(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        sqlx::query(
            "INSERT INTO song_requests (channel_id, song_id, requested_at_ms) VALUES (?, ?, ?)",
        )
        .bind(channel.0 as i64)
        .bind(song.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_requests(&self, channel: ChannelId) -> Result<Vec<SongId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT song_id FROM song_requests WHERE channel_id = ? ORDER BY id ASC",
        )
        .bind(channel.0 as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(SongId).collect())
    }

    async fn complete_request(&self, channel: ChannelId, song: &SongId) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM song_requests
            WHERE id = (
                SELECT MIN(id) FROM song_requests WHERE channel_id = ? AND song_id = ?
            )
            "#,
        )
        .bind(channel.0 as i64)
        .bind(song.as_str())
        .execute(&self.pool)
        .await?;
        debug!(
            "Completed request for {} on channel {} ({} row)",
            song,
            channel,
            result.rows_affected()
        );
        Ok(())
    }
}
