//! Scripted voice gateway

use super::sink::RecordingSink;
use async_trait::async_trait;
use ditty_common::{ChannelId, ListenerId};
use ditty_radio::audio::{BoxedSource, MemorySource, VoiceSink};
use ditty_radio::gateway::{Member, VoiceGateway};
use ditty_radio::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeGateway {
    pub sink: RecordingSink,
    members: Mutex<Vec<Member>>,
    incoming: Mutex<HashMap<ListenerId, Vec<u8>>>,
    failing_connects: AtomicUsize,
    pub connects: AtomicUsize,
    pub listens: AtomicUsize,
}

impl FakeGateway {
    pub fn new(sink: RecordingSink) -> Self {
        Self {
            sink,
            members: Mutex::new(Vec::new()),
            incoming: Mutex::new(HashMap::new()),
            failing_connects: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            listens: AtomicUsize::new(0),
        }
    }

    /// The first `count` connects fail
    pub fn failing_connects(self, count: usize) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    pub fn set_members(&self, members: Vec<Member>) {
        *self.members.lock().unwrap() = members;
    }

    /// Audio returned by `listen` for `listener`, once
    pub fn set_incoming(&self, listener: ListenerId, pcm: Vec<u8>) {
        self.incoming.lock().unwrap().insert(listener, pcm);
    }
}

pub fn member(id: u64, name: &str, is_bot: bool) -> Member {
    Member {
        id: ListenerId(id),
        display_name: name.to_string(),
        is_bot,
        roles: Vec::new(),
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(&self, _channel: ChannelId) -> Result<Box<dyn VoiceSink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Sink("voice connection refused".to_string()));
        }
        Ok(Box::new(self.sink.clone()))
    }

    async fn members(&self, _channel: ChannelId) -> Result<Vec<Member>> {
        Ok(self.members.lock().unwrap().clone())
    }

    async fn listen(&self, _channel: ChannelId, listener: ListenerId) -> Result<Option<BoxedSource>> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .incoming
            .lock()
            .unwrap()
            .remove(&listener)
            .map(|pcm| Box::new(MemorySource::new(pcm)) as BoxedSource))
    }
}
