//! # Ditty Radio Library
//!
//! Streaming engine for a voice-channel radio station.
//!
//! **Purpose:** Select songs per channel, decode and mix them with spoken
//! announcements, stream the mix into a voice sink at real-time cadence, and
//! run a voice assistant session for each listener in the channel.
//!
//! **Architecture:** Pull-based [`audio::AudioSource`] pipeline driven by
//! supervised [`worker::Worker`] tasks (one channel session, one listener
//! session per eligible listener)

pub mod assistant;
pub mod audio;
pub mod db;
pub mod error;
pub mod gateway;
pub mod playback;
pub mod worker;

pub use error::{Error, Result};
