//! Channel control surface
//!
//! [`ChannelControls`] is the narrow interface listener sessions (and the
//! binary) use to act on a channel: skip, request, speak, and query what is
//! playing. It does not own the tracks; the running channel session attaches
//! their handles for the duration of its run.

use crate::audio::speech::Synthesizer;
use crate::playback::track::TrackHandle;
use chrono::Utc;
use ditty_common::events::{EventBus, StationEvent};
use ditty_common::{ChannelId, Song, SongId};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::assistant::commands::SKIP_RESPONSE;

/// Capabilities a listener session may exercise on its channel
pub trait SessionControl: Send + Sync {
    /// Skip the current song; false if a skip is already pending or nothing is live
    fn request_skip(&self) -> bool;

    /// Queue an explicit request for the next selection
    fn enqueue_song(&self, song: SongId) -> bool;

    /// Speak `text` on the announcements track
    fn say(&self, text: &str) -> bool;

    fn now_playing(&self) -> Option<Song>;
}

#[derive(Clone)]
struct LiveTracks {
    music: TrackHandle,
    announcements: TrackHandle,
}

pub struct ChannelControls {
    channel_id: ChannelId,
    synthesizer: Arc<dyn Synthesizer>,
    events: EventBus,
    requests: mpsc::UnboundedSender<SongId>,
    tracks: RwLock<Option<LiveTracks>>,
    now_playing: RwLock<Option<Song>>,
}

impl ChannelControls {
    /// Returns the controls and the receiving end of the request hand-off
    pub fn new(
        channel_id: ChannelId,
        synthesizer: Arc<dyn Synthesizer>,
        events: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<SongId>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                channel_id,
                synthesizer,
                events,
                requests,
                tracks: RwLock::new(None),
                now_playing: RwLock::new(None),
            },
            rx,
        )
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// True while a channel session is streaming
    pub fn is_live(&self) -> bool {
        read(&self.tracks).is_some()
    }

    pub fn pause_music(&self) -> bool {
        self.music().map_or(false, |music| music.try_pause())
    }

    pub fn resume_music(&self) -> bool {
        self.music().map_or(false, |music| music.try_resume())
    }

    pub(crate) fn attach(&self, music: TrackHandle, announcements: TrackHandle) {
        *write(&self.tracks) = Some(LiveTracks {
            music,
            announcements,
        });
    }

    pub(crate) fn detach(&self) {
        *write(&self.tracks) = None;
        *write(&self.now_playing) = None;
    }

    pub(crate) fn set_now_playing(&self, song: Option<Song>) {
        *write(&self.now_playing) = song;
    }

    fn music(&self) -> Option<TrackHandle> {
        read(&self.tracks).as_ref().map(|tracks| tracks.music.clone())
    }

    fn announcements(&self) -> Option<TrackHandle> {
        read(&self.tracks)
            .as_ref()
            .map(|tracks| tracks.announcements.clone())
    }
}

impl SessionControl for ChannelControls {
    fn request_skip(&self) -> bool {
        let Some(music) = self.music() else {
            return false;
        };
        if !music.try_skip() {
            debug!("Skip already pending on channel {}", self.channel_id);
            return false;
        }
        info!("Skip requested on channel {}", self.channel_id);
        self.say(SKIP_RESPONSE);
        true
    }

    fn enqueue_song(&self, song: SongId) -> bool {
        info!("Song {} requested on channel {}", song, self.channel_id);
        self.requests.send(song).is_ok()
    }

    fn say(&self, text: &str) -> bool {
        let Some(announcements) = self.announcements() else {
            debug!("Not live, dropping announcement {:?}", text);
            return false;
        };
        let clip = self.synthesizer.speak(text);
        if announcements.enqueue(clip, Some(text.to_string())).is_err() {
            return false;
        }
        self.events.emit_lossy(StationEvent::AnnouncementQueued {
            channel_id: self.channel_id,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    fn now_playing(&self) -> Option<Song> {
        read(&self.now_playing).clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemorySource;
    use crate::audio::source::BoxedSource;
    use crate::playback::track::Track;

    struct SilentSpeech;

    impl Synthesizer for SilentSpeech {
        fn speak(&self, _text: &str) -> BoxedSource {
            Box::new(MemorySource::silence(4))
        }
    }

    fn controls() -> (ChannelControls, mpsc::UnboundedReceiver<SongId>) {
        ChannelControls::new(ChannelId(7), Arc::new(SilentSpeech), EventBus::new(16))
    }

    #[test]
    fn test_not_live_rejects_track_actions() {
        let (controls, _rx) = controls();
        assert!(!controls.is_live());
        assert!(!controls.request_skip());
        assert!(!controls.say("hello"));
        assert!(!controls.pause_music());
        assert!(controls.now_playing().is_none());
    }

    #[test]
    fn test_requests_are_handed_off() {
        let (controls, mut rx) = controls();
        assert!(controls.enqueue_song(SongId::new("42")));
        assert_eq!(rx.try_recv().unwrap(), SongId::new("42"));
    }

    #[tokio::test]
    async fn test_skip_once_and_announce() {
        let (controls, _rx) = controls();
        let music = Track::new("music");
        let announcements = Track::new("announcements");
        controls.attach(music.handle(), announcements.handle());

        let mut events = controls.events.subscribe();
        assert!(controls.request_skip());
        assert!(!controls.request_skip());

        match events.try_recv().unwrap() {
            StationEvent::AnnouncementQueued { text, .. } => assert_eq!(text, SKIP_RESPONSE),
            other => panic!("unexpected event {:?}", other),
        }

        assert!(controls.pause_music());
        assert!(!controls.pause_music());
        assert!(controls.resume_music());

        controls.detach();
        assert!(!controls.is_live());
    }
}
