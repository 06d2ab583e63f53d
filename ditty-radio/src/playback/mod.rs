//! Channel playback: tracks, song selection, and session supervision

pub mod channel;
pub mod controls;
pub mod selection;
pub mod station;
pub mod track;

pub use channel::{ChannelSession, SessionDeps};
pub use controls::{ChannelControls, SessionControl};
pub use selection::{Selection, SelectionPolicy, SongSelector};
pub use station::Station;
pub use track::{EntryId, EntryOutcome, Track, TrackEvent, TrackHandle};
