//! In-memory transcoder, synthesizer, recognizer and channel control

use async_trait::async_trait;
use ditty_common::{Song, SongId};
use ditty_radio::assistant::{Recognition, Recognizer};
use ditty_radio::audio::types::bytes_from_samples;
use ditty_radio::audio::{BoxedSource, MemorySource, Synthesizer, Transcoder};
use ditty_radio::playback::SessionControl;
use ditty_radio::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Every song decodes to a constant tone of `samples` interleaved samples
pub struct FakeTranscoder {
    samples: usize,
    level: i16,
    pub opened: Mutex<Vec<PathBuf>>,
}

impl FakeTranscoder {
    pub fn new(samples: usize, level: i16) -> Self {
        Self {
            samples,
            level,
            opened: Mutex::new(Vec::new()),
        }
    }
}

impl Transcoder for FakeTranscoder {
    fn open(&self, path: &Path) -> BoxedSource {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Box::new(MemorySource::new(bytes_from_samples(&vec![self.level; self.samples])))
    }
}

/// Records spoken texts; each clip is a short silence
#[derive(Default)]
pub struct FakeSynth {
    pub spoken: Mutex<Vec<String>>,
}

impl FakeSynth {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl Synthesizer for FakeSynth {
    fn speak(&self, text: &str) -> BoxedSource {
        self.spoken.lock().unwrap().push(text.to_string());
        Box::new(MemorySource::silence(64))
    }
}

/// Returns scripted recognitions in order, then nothing
#[derive(Default)]
pub struct FakeRecognizer {
    script: Mutex<Vec<Recognition>>,
    pub submitted: Mutex<Vec<usize>>,
}

impl FakeRecognizer {
    pub fn replying(texts: &[&str]) -> Self {
        Self {
            script: Mutex::new(texts.iter().rev().map(|t| Recognition::from_text(t)).collect()),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn recognize(&self, pcm: Vec<u8>) -> Result<Option<Recognition>> {
        self.submitted.lock().unwrap().push(pcm.len());
        Ok(self.script.lock().unwrap().pop())
    }
}

/// SessionControl that only records calls
#[derive(Default)]
pub struct RecordingControl {
    pub said: Mutex<Vec<String>>,
    pub requested: Mutex<Vec<SongId>>,
    pub skips: Mutex<usize>,
    pub playing: Mutex<Option<Song>>,
}

impl RecordingControl {
    pub fn said(&self) -> Vec<String> {
        self.said.lock().unwrap().clone()
    }
}

impl SessionControl for RecordingControl {
    fn request_skip(&self) -> bool {
        *self.skips.lock().unwrap() += 1;
        true
    }

    fn enqueue_song(&self, song: SongId) -> bool {
        self.requested.lock().unwrap().push(song);
        true
    }

    fn say(&self, text: &str) -> bool {
        self.said.lock().unwrap().push(text.to_string());
        true
    }

    fn now_playing(&self) -> Option<Song> {
        self.playing.lock().unwrap().clone()
    }
}
