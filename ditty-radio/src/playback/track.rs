//! Sequential playlist source
//!
//! A [`Track`] plays its entries one after another as a single
//! [`AudioSource`]. Entries are owned by the track from enqueue until they
//! complete, at which point they are disposed and removed.
//!
//! **Read step:** before delegating to the current entry, each read:
//! 1. applies enqueues posted through [`TrackHandle`]s
//! 2. collects finished background prepares
//! 3. returns 0 if paused (nothing advances or completes)
//! 4. completes the current entry if a skip was requested
//! 5. starts preparing the next pending entry (one lookahead)
//! 6. promotes the first Ready entry if nothing is current
//!
//! A read never waits for an entry to finish preparing; it returns 0 and the
//! caller retries.

use crate::audio::source::{AudioSource, BoxedSource, Lifecycle, SourceState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Track-unique entry identifier
pub type EntryId = u64;

const EVENT_CAPACITY: usize = 64;

/// How an entry left the playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryOutcome {
    /// Source reached its end
    Finished,
    /// Cut short by a skip request
    Skipped,
    /// Prepare or read failed
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    EntryStarted {
        id: EntryId,
        label: Option<String>,
    },
    EntryCompleted {
        id: EntryId,
        label: Option<String>,
        outcome: EntryOutcome,
        /// Entries left in the playlist after removal
        remaining: usize,
    },
}

enum Slot {
    Pending(BoxedSource),
    Preparing(JoinHandle<(BoxedSource, Result<()>)>),
    Ready(BoxedSource),
    /// Transient while a source is moved between states
    Vacant,
}

struct Entry {
    id: EntryId,
    label: Option<String>,
    slot: Slot,
}

struct Enqueue {
    id: EntryId,
    label: Option<String>,
    source: BoxedSource,
}

/// Cross-task control of a [`Track`]
///
/// Requests are applied by the track itself at its next read.
#[derive(Clone)]
pub struct TrackHandle {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Enqueue>,
    next_id: Arc<AtomicU64>,
    skip: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    events: broadcast::Sender<TrackEvent>,
}

impl TrackHandle {
    /// Append `source`; fails if the track no longer exists
    pub fn enqueue(&self, source: BoxedSource, label: Option<String>) -> Result<EntryId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.commands
            .send(Enqueue { id, label, source })
            .map_err(|_| Error::InvalidState(format!("Track {} is gone", self.name)))?;
        Ok(id)
    }

    /// Request a skip; false if one is already pending
    pub fn try_skip(&self) -> bool {
        self.skip
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// False if already paused
    pub fn try_pause(&self) -> bool {
        self.paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// False if not paused
    pub fn try_resume(&self) -> bool {
        self.paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.events.subscribe()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct Track {
    playlist: VecDeque<Entry>,
    current: Option<EntryId>,
    commands: mpsc::UnboundedReceiver<Enqueue>,
    handle: TrackHandle,
    prefetch_cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl Track {
    pub fn new(name: &str) -> Self {
        Self::with_cancel(name, &CancellationToken::new())
    }

    /// Background prepares are cancelled when `parent` fires
    pub fn with_cancel(name: &str, parent: &CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            playlist: VecDeque::new(),
            current: None,
            commands: rx,
            handle: TrackHandle {
                name: Arc::from(name),
                commands: tx,
                next_id: Arc::new(AtomicU64::new(1)),
                skip: Arc::new(AtomicBool::new(false)),
                paused: Arc::new(AtomicBool::new(false)),
                events,
            },
            prefetch_cancel: parent.child_token(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn handle(&self) -> TrackHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.handle.subscribe()
    }

    /// Append `source` directly
    pub fn enqueue(&mut self, source: BoxedSource, label: Option<String>) -> EntryId {
        let id = self.handle.next_id.fetch_add(1, Ordering::SeqCst);
        self.push(Enqueue { id, label, source });
        id
    }

    pub fn try_skip(&self) -> bool {
        self.handle.try_skip()
    }

    pub fn try_pause(&self) -> bool {
        self.handle.try_pause()
    }

    pub fn try_resume(&self) -> bool {
        self.handle.try_resume()
    }

    /// Entries in the playlist, including the current one
    pub fn len(&self) -> usize {
        self.playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.is_empty()
    }

    pub fn current(&self) -> Option<EntryId> {
        self.current
    }

    pub fn current_label(&self) -> Option<&str> {
        let id = self.current?;
        self.playlist
            .iter()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.label.as_deref())
    }

    fn push(&mut self, enqueue: Enqueue) {
        debug!(
            "{}: queued entry {} ({:?})",
            self.handle.name, enqueue.id, enqueue.label
        );
        self.playlist.push_back(Entry {
            id: enqueue.id,
            label: enqueue.label,
            slot: Slot::Pending(enqueue.source),
        });
    }

    fn drain_commands(&mut self) {
        while let Ok(enqueue) = self.commands.try_recv() {
            self.push(enqueue);
        }
    }

    async fn collect_prepared(&mut self) {
        let mut failed = Vec::new();
        for entry in self.playlist.iter_mut() {
            let finished = matches!(&entry.slot, Slot::Preparing(task) if task.is_finished());
            if !finished {
                continue;
            }
            let Slot::Preparing(task) = std::mem::replace(&mut entry.slot, Slot::Vacant) else {
                continue;
            };
            match task.await {
                Ok((source, Ok(()))) => entry.slot = Slot::Ready(source),
                Ok((mut source, Err(e))) => {
                    warn!("{}: entry {} failed to prepare: {}", self.handle.name, entry.id, e);
                    source.dispose().await;
                    failed.push(entry.id);
                }
                Err(e) => {
                    error!("{}: prepare task for entry {} died: {}", self.handle.name, entry.id, e);
                    failed.push(entry.id);
                }
            }
        }
        for id in failed {
            self.complete(id, EntryOutcome::Failed).await;
        }
    }

    fn start_prefetch(&mut self) {
        let current = self.current;
        let in_flight = self.playlist.iter().any(|entry| {
            Some(entry.id) != current && matches!(entry.slot, Slot::Preparing(_) | Slot::Ready(_))
        });
        if in_flight {
            return;
        }
        let Some(entry) = self
            .playlist
            .iter_mut()
            .find(|entry| Some(entry.id) != current && matches!(entry.slot, Slot::Pending(_)))
        else {
            return;
        };
        if let Slot::Pending(mut source) = std::mem::replace(&mut entry.slot, Slot::Vacant) {
            let cancel = self.prefetch_cancel.clone();
            debug!("{}: preparing entry {}", self.handle.name, entry.id);
            entry.slot = Slot::Preparing(tokio::spawn(async move {
                let result = source.prepare(&cancel).await;
                (source, result)
            }));
        }
    }

    fn promote(&mut self) {
        if self.current.is_some() {
            return;
        }
        if let Some(entry) = self
            .playlist
            .iter()
            .find(|entry| matches!(entry.slot, Slot::Ready(_)))
        {
            self.current = Some(entry.id);
            debug!("{}: started entry {} ({:?})", self.handle.name, entry.id, entry.label);
            let _ = self.handle.events.send(TrackEvent::EntryStarted {
                id: entry.id,
                label: entry.label.clone(),
            });
        }
    }

    /// Dispose and remove an entry, reporting its outcome
    async fn complete(&mut self, id: EntryId, outcome: EntryOutcome) {
        let Some(index) = self.playlist.iter().position(|entry| entry.id == id) else {
            return;
        };
        let Some(entry) = self.playlist.remove(index) else {
            return;
        };
        release(entry.slot).await;
        if self.current == Some(id) {
            self.current = None;
        }
        debug!(
            "{}: entry {} completed ({:?}), {} remaining",
            self.handle.name,
            id,
            outcome,
            self.playlist.len()
        );
        let _ = self.handle.events.send(TrackEvent::EntryCompleted {
            id,
            label: entry.label,
            outcome,
            remaining: self.playlist.len(),
        });
    }
}

async fn release(slot: Slot) {
    match slot {
        Slot::Pending(mut source) | Slot::Ready(mut source) => source.dispose().await,
        // Prepares observe the track's cancellation token, so this returns promptly on dispose
        Slot::Preparing(task) => {
            if let Ok((mut source, _)) = task.await {
                source.dispose().await;
            }
        }
        Slot::Vacant => {}
    }
}

#[async_trait]
impl AudioSource for Track {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.lifecycle.begin_prepare("Track")? {
            self.lifecycle.finish_prepare(&Ok(()));
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("Track")?;

        self.drain_commands();
        self.collect_prepared().await;

        if self.handle.is_paused() {
            self.start_prefetch();
            return Ok(0);
        }

        if self.handle.skip.swap(false, Ordering::SeqCst) {
            if let Some(id) = self.current {
                self.complete(id, EntryOutcome::Skipped).await;
            }
        }

        self.start_prefetch();
        self.promote();
        self.start_prefetch();

        let Some(id) = self.current else {
            return Ok(0);
        };
        let Some(Slot::Ready(source)) = self
            .playlist
            .iter_mut()
            .find(|entry| entry.id == id)
            .map(|entry| &mut entry.slot)
        else {
            self.current = None;
            return Ok(0);
        };

        match source.read(buf, cancel).await {
            Ok(0) => {
                self.complete(id, EntryOutcome::Finished).await;
                self.start_prefetch();
                Ok(0)
            }
            Ok(count) => Ok(count),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!("{}: entry {} read failed: {}", self.handle.name, id, e);
                self.complete(id, EntryOutcome::Failed).await;
                Err(e)
            }
        }
    }

    async fn dispose(&mut self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        self.prefetch_cancel.cancel();
        self.commands.close();
        self.drain_commands();
        self.current = None;
        while let Some(entry) = self.playlist.pop_front() {
            release(entry.slot).await;
        }
        debug!("{}: disposed", self.handle.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemorySource;
    use std::time::Duration;

    fn clip(len: usize, value: u8) -> BoxedSource {
        Box::new(MemorySource::new(vec![value; len]))
    }

    /// Read until a non-empty block arrives (entries prepare in the background)
    async fn read_some(track: &mut Track, buf: &mut [u8], cancel: &CancellationToken) -> usize {
        for _ in 0..200 {
            let count = track.read(buf, cancel).await.unwrap();
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        0
    }

    #[tokio::test]
    async fn test_empty_track_reads_zero() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(track.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plays_entries_in_order() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        track.enqueue(clip(4, 1), None);
        track.enqueue(clip(4, 2), None);

        let mut buf = [0u8; 4];
        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 4);
        assert_eq!(buf, [1; 4]);
        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 4);
        assert_eq!(buf, [2; 4]);
        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 0);
        assert!(track.is_empty());
    }

    #[tokio::test]
    async fn test_completion_reported_once() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        let mut events = track.subscribe();
        track.prepare(&cancel).await.unwrap();
        track.enqueue(clip(4, 1), Some("a".to_string()));

        let mut buf = [0u8; 4];
        read_some(&mut track, &mut buf, &cancel).await;
        for _ in 0..5 {
            track.read(&mut buf, &cancel).await.unwrap();
        }

        let mut completions = 0;
        while let Ok(event) = events.try_recv() {
            if let TrackEvent::EntryCompleted { label, outcome, remaining, .. } = event {
                assert_eq!(label.as_deref(), Some("a"));
                assert_eq!(outcome, EntryOutcome::Finished);
                assert_eq!(remaining, 0);
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_skip_completes_current() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        track.enqueue(clip(400, 1), None);
        track.enqueue(clip(4, 2), None);

        let mut buf = [0u8; 4];
        read_some(&mut track, &mut buf, &cancel).await;
        assert!(track.try_skip());
        assert!(!track.try_skip());

        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 4);
        assert_eq!(buf, [2; 4]);
    }

    #[tokio::test]
    async fn test_pause_holds_position() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        track.enqueue(clip(8, 1), None);

        let mut buf = [0u8; 4];
        read_some(&mut track, &mut buf, &cancel).await;
        assert!(track.try_pause());
        assert!(!track.try_pause());
        assert!(track.try_skip());
        for _ in 0..3 {
            assert_eq!(track.read(&mut buf, &cancel).await.unwrap(), 0);
        }
        assert_eq!(track.len(), 1);

        assert!(track.try_resume());
        assert!(!track.try_resume());
        // Pending skip applies once resumed
        track.read(&mut buf, &cancel).await.unwrap();
        assert!(track.is_empty());
    }

    #[tokio::test]
    async fn test_handle_enqueue_applies_on_read() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        let handle = track.handle();
        handle.enqueue(clip(4, 7), Some("remote".to_string())).unwrap();
        assert!(track.is_empty());

        let mut buf = [0u8; 4];
        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 4);
        assert_eq!(buf, [7; 4]);
    }

    #[tokio::test]
    async fn test_failed_prepare_drops_entry() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        let mut events = track.subscribe();
        track.prepare(&cancel).await.unwrap();

        let mut broken = MemorySource::silence(4);
        broken.dispose().await;
        track.enqueue(Box::new(broken), None);
        track.enqueue(clip(4, 3), None);

        let mut buf = [0u8; 4];
        assert_eq!(read_some(&mut track, &mut buf, &cancel).await, 4);
        assert_eq!(buf, [3; 4]);

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            if let TrackEvent::EntryCompleted { outcome: EntryOutcome::Failed, .. } = event {
                failed = true;
            }
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_dispose_rejects_reads_and_enqueues() {
        let cancel = CancellationToken::new();
        let mut track = Track::new("test");
        track.prepare(&cancel).await.unwrap();
        let handle = track.handle();
        track.enqueue(clip(4, 1), None);
        track.dispose().await;

        let mut buf = [0u8; 4];
        assert!(track.read(&mut buf, &cancel).await.is_err());
        assert!(handle.enqueue(clip(4, 1), None).is_err());
    }
}
