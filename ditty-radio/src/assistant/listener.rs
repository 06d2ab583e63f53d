//! Per-listener voice assistant session
//!
//! One [`ListenerSession`] runs as a worker for each eligible member of a
//! channel. It opens the member's incoming audio and loops:
//!
//! 1. feed detector-rate mono frames to the wake-word detector
//! 2. on a trigger, rewind the retained stereo stream slightly so the start
//!    of the command is not lost
//! 3. capture the utterance at 48 kHz mono and send it for recognition
//! 4. act on the interpreted command through the channel's [`SessionControl`]
//!
//! **Pipeline:** incoming 48 kHz stereo → [`BufferedSeekSource`] (rewindable)
//! → [`DownsampleSource`] to mono (left channel) → [`DownsampleSource`] to the
//! detector rate.

use super::capture::{capture_utterance, CaptureSettings};
use super::commands::{self, interpret, VoiceCommand};
use super::detector::{DetectorFactory, WakeDetector};
use super::recognizer::Recognizer;
use crate::audio::buffered::BufferedSeekSource;
use crate::audio::downsample::DownsampleSource;
use crate::audio::source::{AudioSource, BoxedSource};
use crate::audio::types::{samples_from_bytes, PcmFormat, BYTES_PER_SAMPLE, STATION_SAMPLE_RATE};
use crate::db::SongStore;
use crate::error::{Error, Result};
use crate::gateway::{Member, VoiceGateway};
use crate::playback::controls::SessionControl;
use crate::worker::WorkerTask;
use async_trait::async_trait;
use ditty_common::config::RecognizerConfig;
use ditty_common::ChannelId;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunk size of the rewindable incoming stream
const INCOMING_CHUNK_BYTES: usize = 3840;

/// Stereo audio retained for rewinding after a trigger
const RETAINED_AUDIO: Duration = Duration::from_secs(10);

/// Everything a listener session needs besides its channel wiring
#[derive(Clone)]
pub struct AssistantServices {
    pub recognizer: Arc<dyn Recognizer>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub config: RecognizerConfig,
}

type MonoStream = DownsampleSource<BufferedSeekSource<BoxedSource>>;
type DetectorStream = DownsampleSource<MonoStream>;

pub struct ListenerSession {
    channel: ChannelId,
    member: Member,
    gateway: Arc<dyn VoiceGateway>,
    store: Arc<dyn SongStore>,
    control: Arc<dyn SessionControl>,
    services: AssistantServices,
}

impl ListenerSession {
    pub fn new(
        channel: ChannelId,
        member: Member,
        gateway: Arc<dyn VoiceGateway>,
        store: Arc<dyn SongStore>,
        control: Arc<dyn SessionControl>,
        services: AssistantServices,
    ) -> Self {
        Self {
            channel,
            member,
            gateway,
            store,
            control,
            services,
        }
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    fn build_pipeline(&self, incoming: BoxedSource, detector_rate: u32) -> Result<DetectorStream> {
        let retention = PcmFormat::STATION.bytes_for(RETAINED_AUDIO);
        let buffered = BufferedSeekSource::new(incoming, INCOMING_CHUNK_BYTES).with_retention(retention);
        // Interleaved stereo read as a double-rate mono stream keeps the left channel
        let mono = DownsampleSource::new(buffered, STATION_SAMPLE_RATE * 2, STATION_SAMPLE_RATE)?;
        DownsampleSource::new(mono, STATION_SAMPLE_RATE, detector_rate)
    }

    async fn listen_loop(
        &self,
        pipeline: &mut DetectorStream,
        detector: &mut dyn WakeDetector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let settings = CaptureSettings::from(&self.services.config);
        let rewind_bytes = rewind_bytes(self.services.config.trigger_rewind_ms);

        while !cancel.is_cancelled() {
            if !wait_for_trigger(pipeline, detector, cancel).await? {
                debug!("Incoming audio of {} ended", self.member.display_name);
                return Ok(());
            }
            info!(
                listener = %self.member.id,
                channel = %self.channel,
                "Wake word detected"
            );

            pipeline.get_mut().get_mut().seek(SeekFrom::Current(-rewind_bytes));
            pipeline.get_mut().reset();
            pipeline.reset();

            let audio = capture_utterance(pipeline.get_mut(), &settings).await?;
            debug!("Captured {} bytes from {}", audio.len(), self.member.display_name);

            let recognition = match timeout(
                self.services.config.timeout(),
                self.services.recognizer.recognize(audio),
            )
            .await
            {
                Ok(Ok(recognition)) => recognition,
                Ok(Err(e)) => {
                    warn!("Recognition failed for {}: {}", self.member.display_name, e);
                    None
                }
                Err(_) => {
                    warn!("Recognition timed out for {}", self.member.display_name);
                    None
                }
            };

            let command = recognition.as_ref().map_or(VoiceCommand::NotUnderstood, interpret);
            if let Err(e) = self.execute(command).await {
                warn!("Voice command from {} failed: {}", self.member.display_name, e);
            }
        }
        Ok(())
    }

    /// Carry out `command` on the channel
    pub async fn execute(&self, command: VoiceCommand) -> Result<()> {
        info!(
            listener = %self.member.id,
            channel = %self.channel,
            command = ?command,
            "Voice command"
        );
        match command {
            VoiceCommand::Introduce { name } => {
                self.control.say(&commands::greeting(&name));
            }
            VoiceCommand::Skip => {
                self.control.request_skip();
            }
            VoiceCommand::Play { query } => {
                let songs = self.store.ready_songs().await?;
                match commands::best_match(&songs, &query) {
                    Some(song) => {
                        self.control.enqueue_song(song.id.clone());
                        self.control.say(&commands::song_added(&song.title));
                    }
                    None => {
                        self.control.say(commands::NOT_UNDERSTOOD_RESPONSE);
                    }
                }
            }
            VoiceCommand::NowPlaying => {
                let current = self.control.now_playing();
                self.control
                    .say(&commands::now_playing(current.as_ref().map(|song| song.title.as_str())));
            }
            VoiceCommand::Echo { text } => {
                self.control.say(&text);
            }
            VoiceCommand::NotUnderstood => {
                self.control.say(commands::NOT_UNDERSTOOD_RESPONSE);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerTask for ListenerSession {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let Some(incoming) = self.gateway.listen(self.channel, self.member.id).await? else {
            debug!("No incoming audio for {}", self.member.display_name);
            return Ok(());
        };
        let mut detector = self.services.detectors.create()?;
        let mut pipeline = self.build_pipeline(incoming, detector.sample_rate())?;

        let result = match pipeline.prepare(&cancel).await {
            Ok(()) => self.listen_loop(&mut pipeline, detector.as_mut(), &cancel).await,
            Err(e) => Err(e),
        };
        pipeline.dispose().await;

        match result {
            Ok(()) | Err(Error::Cancelled) => {
                self.control.say(&commands::goodbye(&self.member.display_name));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Stereo byte offset for `millis` of rewind, frame aligned
pub fn rewind_bytes(millis: u64) -> i64 {
    let bytes = PcmFormat::STATION.bytes_for(Duration::from_millis(millis));
    let frame = PcmFormat::STATION.bytes_per_frame();
    (bytes - bytes % frame) as i64
}

/// Feed frames to `detector` until it fires; false if the stream ends first
async fn wait_for_trigger<S>(
    source: &mut S,
    detector: &mut dyn WakeDetector,
    cancel: &CancellationToken,
) -> Result<bool>
where
    S: AudioSource + ?Sized,
{
    let mut frame = vec![0u8; detector.frame_length().max(1) * BYTES_PER_SAMPLE];
    loop {
        if read_exact(source, &mut frame, cancel).await? < frame.len() {
            return Ok(false);
        }
        if detector.process(&samples_from_bytes(&frame)) {
            return Ok(true);
        }
    }
}

async fn read_exact<S>(source: &mut S, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize>
where
    S: AudioSource + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let count = source.read(&mut buf[filled..], cancel).await?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(filled)
}
