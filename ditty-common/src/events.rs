//! Event types for the Ditty station
//!
//! Provides the shared [`StationEvent`] definitions and the [`EventBus`]
//! used by the station to announce what it is doing.

use crate::models::{ChannelId, ListenerId, SongId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// How a song was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Taken from the explicit request queue
    Requested,
    /// Drawn from the weighted catalog
    Weighted,
}

/// Which track of a channel mix an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Music,
    Announcements,
}

/// Station event types
///
/// Events are broadcast via EventBus and can be serialized for logging or
/// forwarding to an external observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StationEvent {
    /// Next song chosen for a channel (play already recorded)
    SongSelected {
        channel_id: ChannelId,
        song_id: SongId,
        title: String,
        reason: SelectionReason,
        /// Final weight (None for requested songs)
        weight: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// A track adopted a new current entry
    EntryStarted {
        channel_id: ChannelId,
        track: TrackKind,
        label: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A track entry finished or was skipped
    EntryCompleted {
        channel_id: ChannelId,
        track: TrackKind,
        label: Option<String>,
        skipped: bool,
        timestamp: DateTime<Utc>,
    },

    /// Voice assistant session started for a listener
    ListenerJoined {
        channel_id: ChannelId,
        listener_id: ListenerId,
        timestamp: DateTime<Utc>,
    },

    /// Voice assistant session stopped for a listener
    ListenerLeft {
        channel_id: ChannelId,
        listener_id: ListenerId,
        timestamp: DateTime<Utc>,
    },

    /// Text queued for speech on the announcements track
    AnnouncementQueued {
        channel_id: ChannelId,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// Channel session returned to Stopped
    SessionStopped {
        channel_id: ChannelId,
        /// Failure message if the session crashed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StationEvent {
    /// Channel the event belongs to
    pub fn channel_id(&self) -> ChannelId {
        match self {
            StationEvent::SongSelected { channel_id, .. }
            | StationEvent::EntryStarted { channel_id, .. }
            | StationEvent::EntryCompleted { channel_id, .. }
            | StationEvent::ListenerJoined { channel_id, .. }
            | StationEvent::ListenerLeft { channel_id, .. }
            | StationEvent::AnnouncementQueued { channel_id, .. }
            | StationEvent::SessionStopped { channel_id, .. } => *channel_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use ditty_common::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// assert_eq!(bus.capacity(), 100);
/// # drop(rx);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: StationEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for station event");
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit_lossy(StationEvent::AnnouncementQueued {
            channel_id: ChannelId(7),
            text: "hello".to_string(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel_id(), ChannelId(7));
        assert!(matches!(event, StationEvent::AnnouncementQueued { ref text, .. } if text == "hello"));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(10);
        bus.emit_lossy(StationEvent::SessionStopped {
            channel_id: ChannelId(1),
            error: None,
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = StationEvent::ListenerJoined {
            channel_id: ChannelId(1),
            listener_id: ListenerId(2),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ListenerJoined");
        assert_eq!(json["listener_id"], 2);
    }
}
