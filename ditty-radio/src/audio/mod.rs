//! PCM sources, decorators, and sinks

pub mod buffered;
pub mod downsample;
pub mod materialized;
pub mod memory;
pub mod mixed;
pub mod output;
pub mod source;
pub mod speech;
pub mod stream;
pub mod transcode;
pub mod types;
pub mod volume;

pub use buffered::BufferedSeekSource;
pub use downsample::DownsampleSource;
pub use materialized::MaterializedSource;
pub use memory::MemorySource;
pub use mixed::MixedSource;
pub use output::{EncoderSink, VoiceSink};
pub use source::{cancellable, AudioSource, BoxedSource, Lifecycle, SourceState};
pub use speech::{CommandSynthesizer, SpeechSource, Synthesizer};
pub use stream::StreamSource;
pub use transcode::{FfmpegSource, FfmpegTranscoder, Transcoder};
pub use types::PcmFormat;
pub use volume::VolumeSource;
