//! Database initialization
//!
//! Opens (creating if needed) the SQLite catalog and ensures the station's
//! tables exist. Schema creation is idempotent.

use crate::error::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open the database at `db_path`, creating file and schema on first run
pub async fn open_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Private in-memory database (single connection so all queries share it)
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

pub async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT,
            flair TEXT,
            approved INTEGER NOT NULL DEFAULT 0,
            audio_path TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq orders plays within the same millisecond
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS play_history (
            channel_id INTEGER NOT NULL,
            song_id TEXT NOT NULL,
            last_played_ms INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            PRIMARY KEY (channel_id, song_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_play_history_recent ON play_history (channel_id, seq DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS song_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL,
            song_id TEXT NOT NULL,
            requested_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
