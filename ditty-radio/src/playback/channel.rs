//! Channel session
//!
//! A [`ChannelSession`] is the worker task behind one voice channel. Each run:
//!
//! 1. connects the channel's [`VoiceSink`] through the gateway
//! 2. builds a music [`Track`] fed by the [`SongSelector`] and an
//!    announcements [`Track`] fed by [`ChannelControls::say`]; the next song
//!    is chosen only once the music track runs empty, so a request made
//!    during a song plays right after it
//! 3. mixes both (each behind its own [`VolumeSource`]) and writes one
//!    sink-sized frame per iteration, sleeping `idle_delay` when the mix is
//!    silent-empty
//! 4. on cancellation or a fatal error flushes and closes the sink
//!
//! Alongside the streaming loop a supervision task polls channel membership
//! every `supervision_interval` and keeps one [`ListenerSession`] worker per
//! eligible listener.
//!
//! **Ownership:** the request queue and the selector are held by the running
//! loop for the whole run; other workers reach them only through
//! [`ChannelControls`]. Requests are persisted as they arrive, reloaded when
//! a run starts with nothing pending and deleted once served.

use super::controls::ChannelControls;
use super::selection::{SelectionPolicy, SongSelector};
use super::track::{EntryId, EntryOutcome, Track, TrackEvent, TrackHandle};
use crate::assistant::listener::{AssistantServices, ListenerSession};
use crate::audio::mixed::MixedSource;
use crate::audio::output::VoiceSink;
use crate::audio::source::AudioSource;
use crate::audio::speech::Synthesizer;
use crate::audio::transcode::Transcoder;
use crate::audio::volume::VolumeSource;
use crate::db::SongStore;
use crate::error::{Error, Result};
use crate::gateway::{Member, VoiceGateway};
use crate::playback::controls::SessionControl;
use crate::worker::{Worker, WorkerStatus, WorkerTask};
use async_trait::async_trait;
use chrono::Utc;
use ditty_common::config::StationConfig;
use ditty_common::events::{EventBus, SelectionReason, StationEvent, TrackKind};
use ditty_common::{ChannelId, ListenerId, Song, SongId};
use futures::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External collaborators of a channel session
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn VoiceGateway>,
    pub store: Arc<dyn SongStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Voice assistant; None disables listener sessions
    pub assistant: Option<AssistantServices>,
    pub events: EventBus,
}

struct RequestQueue {
    incoming: mpsc::UnboundedReceiver<SongId>,
    pending: VecDeque<SongId>,
}

/// Music entries owned by the current run
#[derive(Default)]
struct MusicState {
    songs: HashMap<EntryId, Song>,
    current: Option<EntryId>,
    last_empty_refill: Option<Instant>,
}

pub struct ChannelSession {
    channel: ChannelId,
    config: StationConfig,
    deps: SessionDeps,
    controls: Arc<ChannelControls>,
    requests: Mutex<RequestQueue>,
    selector: Mutex<SongSelector>,
}

impl ChannelSession {
    pub fn new(channel: ChannelId, config: StationConfig, deps: SessionDeps) -> Self {
        let (controls, incoming) =
            ChannelControls::new(channel, Arc::clone(&deps.synthesizer), deps.events.clone());
        let policy = SelectionPolicy::new(config.flair_multipliers.clone());
        let selector = SongSelector::new(Arc::clone(&deps.store), channel, policy);
        Self {
            channel,
            config,
            deps,
            controls: Arc::new(controls),
            requests: Mutex::new(RequestQueue {
                incoming,
                pending: VecDeque::new(),
            }),
            selector: Mutex::new(selector),
        }
    }

    /// Seed the selector's random source
    pub fn with_seed(mut self, seed: u64) -> Self {
        let selector = self.selector.get_mut();
        let policy = selector.policy().clone();
        *selector = SongSelector::new(Arc::clone(&self.deps.store), self.channel, policy).with_seed(seed);
        self
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.deps.events
    }

    pub fn controls(&self) -> Arc<ChannelControls> {
        Arc::clone(&self.controls)
    }

    /// Whether `member` gets a listener session
    pub fn is_eligible(&self, member: &Member) -> bool {
        self.config.voice_commands_enabled
            && !member.is_bot
            && self
                .config
                .voice_command_role
                .map_or(true, |role| member.has_role(role))
    }

    async fn stream(&self, sink: &mut dyn VoiceSink, cancel: &CancellationToken) -> Result<()> {
        let mut requests = self.requests.lock().await;
        let mut selector = self.selector.lock().await;
        self.restore_requests(&mut requests).await;

        let music = Track::with_cancel("music", cancel);
        let announcements = Track::with_cancel("announcements", cancel);
        let mut music_events = music.subscribe();
        let mut announcement_events = announcements.subscribe();
        let music_handle = music.handle();
        self.controls.attach(music.handle(), announcements.handle());

        let mut mix = MixedSource::new(vec![
            VolumeSource::new(music, self.config.music_volume),
            VolumeSource::new(announcements, self.config.announcement_volume),
        ]);
        mix.prepare(cancel).await?;

        let mut state = MusicState::default();
        let mut frame = vec![0u8; sink.frame_size()];
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            self.drain_requests(&mut requests).await;
            self.handle_events(&mut music_events, TrackKind::Music, &mut state);
            self.handle_events(&mut announcement_events, TrackKind::Announcements, &mut state);
            self.refill(&mut selector, &mut requests.pending, &music_handle, &mut state)
                .await;

            let count = match mix.read(&mut frame, cancel).await {
                Ok(count) => count,
                Err(Error::Cancelled) => break Ok(()),
                Err(e) if e.is_fatal_to_session() => break Err(e),
                Err(e) => {
                    warn!(channel = %self.channel, "Mix read failed: {}", e);
                    0
                }
            };

            if count == 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(self.config.idle_delay()) => {}
                }
                continue;
            }

            if let Err(e) = sink.write(&frame[..count]).await {
                break Err(e);
            }
        };

        mix.dispose().await;
        // Entries released on dispose still report completion
        self.handle_events(&mut music_events, TrackKind::Music, &mut state);
        self.handle_events(&mut announcement_events, TrackKind::Announcements, &mut state);
        result
    }

    /// Pick up requests persisted by an earlier run
    async fn restore_requests(&self, requests: &mut RequestQueue) {
        if !requests.pending.is_empty() {
            return;
        }
        match self.deps.store.pending_requests(self.channel).await {
            Ok(stored) if !stored.is_empty() => {
                info!(channel = %self.channel, "Restored {} pending requests", stored.len());
                requests.pending.extend(stored);
            }
            Ok(_) => {}
            Err(e) => warn!(channel = %self.channel, "Failed to load pending requests: {}", e),
        }
    }

    async fn drain_requests(&self, requests: &mut RequestQueue) {
        while let Ok(song) = requests.incoming.try_recv() {
            if let Err(e) = self.deps.store.enqueue_request(self.channel, &song).await {
                warn!(channel = %self.channel, "Failed to persist request {}: {}", song, e);
            }
            debug!(channel = %self.channel, "Queued request {}", song);
            requests.pending.push_back(song);
        }
    }

    /// Queue the next song once the music track has nothing left
    async fn refill(
        &self,
        selector: &mut SongSelector,
        queue: &mut VecDeque<SongId>,
        music: &TrackHandle,
        state: &mut MusicState,
    ) {
        while state.songs.is_empty() {
            if let Some(at) = state.last_empty_refill {
                if at.elapsed() < self.config.supervision_interval() {
                    return;
                }
            }

            let selection = match selector.select_next(queue).await {
                Ok(Some(selection)) => selection,
                Ok(None) => {
                    state.last_empty_refill = Some(Instant::now());
                    return;
                }
                Err(e) => {
                    warn!(channel = %self.channel, "Song selection failed: {}", e);
                    state.last_empty_refill = Some(Instant::now());
                    return;
                }
            };
            state.last_empty_refill = None;

            let song = selection.song;
            if selection.reason == SelectionReason::Requested {
                if let Err(e) = self.deps.store.complete_request(self.channel, &song.id).await {
                    warn!(channel = %self.channel, "Failed to clear request {}: {}", song.id, e);
                }
            }
            let Some(path) = song.audio_path.as_deref() else {
                continue;
            };
            let source = self.deps.transcoder.open(path);
            let id = match music.enqueue(source, Some(song.title.clone())) {
                Ok(id) => id,
                Err(e) => {
                    warn!(channel = %self.channel, "Music track closed: {}", e);
                    return;
                }
            };

            self.deps.events.emit_lossy(StationEvent::SongSelected {
                channel_id: self.channel,
                song_id: song.id.clone(),
                title: song.title.clone(),
                reason: selection.reason,
                weight: selection.weight,
                timestamp: Utc::now(),
            });
            state.songs.insert(id, song);
        }
    }

    fn handle_events(
        &self,
        events: &mut broadcast::Receiver<TrackEvent>,
        track: TrackKind,
        state: &mut MusicState,
    ) {
        loop {
            let event = match events.try_recv() {
                Ok(event) => event,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(channel = %self.channel, "Missed {} {:?} track events", missed, track);
                    continue;
                }
                Err(_) => return,
            };

            match event {
                TrackEvent::EntryStarted { id, label } => {
                    if track == TrackKind::Music {
                        state.current = Some(id);
                        self.controls.set_now_playing(state.songs.get(&id).cloned());
                    }
                    self.deps.events.emit_lossy(StationEvent::EntryStarted {
                        channel_id: self.channel,
                        track,
                        label,
                        timestamp: Utc::now(),
                    });
                }
                TrackEvent::EntryCompleted { id, label, outcome, .. } => {
                    if track == TrackKind::Music {
                        state.songs.remove(&id);
                        if state.current == Some(id) {
                            state.current = None;
                            self.controls.set_now_playing(None);
                        }
                    }
                    self.deps.events.emit_lossy(StationEvent::EntryCompleted {
                        channel_id: self.channel,
                        track,
                        label,
                        skipped: outcome == EntryOutcome::Skipped,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    async fn supervise_listeners(self: Arc<Self>, cancel: CancellationToken) {
        let Some(services) = self.deps.assistant.clone() else {
            debug!(channel = %self.channel, "Voice assistant disabled");
            return;
        };

        let mut listeners: HashMap<ListenerId, Worker<ListenerSession>> = HashMap::new();
        // First pass one interval in, once the stream is live
        let period = self.config.supervision_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.supervise_once(&services, &mut listeners).await {
                warn!(channel = %self.channel, "Listener supervision failed: {}", e);
            }
        }

        let remaining: Vec<Worker<ListenerSession>> = listeners.into_values().collect();
        join_all(remaining.iter().map(|worker| worker.shutdown())).await;
        for worker in &remaining {
            self.listener_left(worker.task().member().id);
        }
    }

    /// One membership pass: reap finished sessions, stop departed, start newcomers
    async fn supervise_once(
        &self,
        services: &AssistantServices,
        listeners: &mut HashMap<ListenerId, Worker<ListenerSession>>,
    ) -> Result<()> {
        let members = self.deps.gateway.members(self.channel).await?;
        let eligible: HashMap<ListenerId, Member> = members
            .into_iter()
            .filter(|member| self.is_eligible(member))
            .map(|member| (member.id, member))
            .collect();

        let finished: HashSet<ListenerId> = listeners
            .iter()
            .filter(|(_, worker)| worker.status() == WorkerStatus::Stopped)
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            listeners.remove(id);
            debug!(channel = %self.channel, listener = %id, "Reaped finished listener session");
            self.listener_left(*id);
        }

        let departed_ids: Vec<ListenerId> = listeners
            .keys()
            .filter(|id| !eligible.contains_key(id))
            .copied()
            .collect();
        let departed: Vec<Worker<ListenerSession>> = departed_ids
            .iter()
            .filter_map(|id| listeners.remove(id))
            .collect();
        join_all(departed.iter().map(|worker| worker.shutdown())).await;
        for id in departed_ids {
            self.listener_left(id);
        }

        for (id, member) in eligible {
            if listeners.contains_key(&id) || finished.contains(&id) {
                continue;
            }
            let control: Arc<dyn SessionControl> = self.controls.clone();
            let session = ListenerSession::new(
                self.channel,
                member,
                Arc::clone(&self.deps.gateway),
                Arc::clone(&self.deps.store),
                control,
                services.clone(),
            );
            let worker = Worker::new(format!("listener-{}-{}", self.channel, id), session);
            if let Err(e) = worker.start() {
                error!(channel = %self.channel, listener = %id, "Failed to start listener session: {}", e);
                continue;
            }
            info!(channel = %self.channel, listener = %id, "Listener joined");
            self.deps.events.emit_lossy(StationEvent::ListenerJoined {
                channel_id: self.channel,
                listener_id: id,
                timestamp: Utc::now(),
            });
            listeners.insert(id, worker);
        }
        Ok(())
    }

    fn listener_left(&self, listener: ListenerId) {
        info!(channel = %self.channel, listener = %listener, "Listener left");
        self.deps.events.emit_lossy(StationEvent::ListenerLeft {
            channel_id: self.channel,
            listener_id: listener,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl WorkerTask for ChannelSession {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut sink = self.deps.gateway.connect(self.channel).await?;
        info!(channel = %self.channel, "Channel session connected");

        let supervision = cancel.child_token();
        let supervisor = tokio::spawn(Arc::clone(&self).supervise_listeners(supervision.clone()));

        let result = self.stream(sink.as_mut(), &cancel).await;

        if let Err(e) = sink.flush().await {
            warn!(channel = %self.channel, "Sink flush failed: {}", e);
        }
        if let Err(e) = sink.close().await {
            warn!(channel = %self.channel, "Sink close failed: {}", e);
        }
        self.controls.detach();

        supervision.cancel();
        if let Err(e) = supervisor.await {
            error!(channel = %self.channel, "Listener supervisor panicked: {}", e);
        }

        info!(channel = %self.channel, "Channel session disconnected");
        result
    }
}
