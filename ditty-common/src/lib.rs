//! # Ditty Common Library
//!
//! Shared code for the Ditty radio crates including:
//! - Song and play-history model types
//! - Station event types (StationEvent enum) and the EventBus
//! - TOML configuration loading with environment overrides
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use models::{ChannelId, ListenerId, PlayRecord, Song, SongId};
