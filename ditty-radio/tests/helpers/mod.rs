//! Test helpers for ditty-radio integration tests
//!
//! Provides stand-ins for every external collaborator of a channel:
//! - RecordingSink: captures frames written by a channel session
//! - FakeGateway: scripted members, incoming audio and connect failures
//! - FakeTranscoder / FakeSynth: in-memory song and speech PCM
//! - FakeRecognizer / RecordingControl: assistant inputs and outputs

#![allow(dead_code)]

pub mod gateway;
pub mod services;
pub mod sink;

pub use gateway::FakeGateway;
pub use services::{FakeRecognizer, FakeSynth, FakeTranscoder, RecordingControl};
pub use sink::{RecordingSink, SinkLog};

use ditty_common::config::StationConfig;
use ditty_common::events::StationEvent;
use ditty_common::{Song, SongId};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

/// Approved, downloaded catalog entry
pub fn song(id: &str, title: &str) -> Song {
    Song {
        id: SongId::new(id),
        title: title.to_string(),
        url: Some(format!("https://example.com/{}", id)),
        flair: None,
        approved: true,
        audio_path: Some(PathBuf::from(format!("/music/{}.mp3", id))),
    }
}

/// Station settings with short timings and small frames
pub fn fast_station() -> StationConfig {
    StationConfig {
        frame_bytes: 64,
        idle_delay_ms: 5,
        supervision_interval_ms: 20,
        restart_delay_ms: 20,
        ..StationConfig::default()
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<StationEvent>,
    limit: Duration,
    mut pred: F,
) -> Option<StationEvent>
where
    F: FnMut(&StationEvent) -> bool,
{
    tokio::time::timeout(limit, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_until<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
