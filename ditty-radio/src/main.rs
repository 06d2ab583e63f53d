//! Ditty Radio - Main entry point
//!
//! Streams one channel's station mix into a local encoder (file or URL) and
//! runs until Ctrl+C or SIGTERM.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use ditty_common::config::{load_config, TomlConfig};
use ditty_common::events::EventBus;
use ditty_common::ChannelId;
use ditty_radio::assistant::{
    AssistantServices, DetectorFactory, EnergyDetector, HttpRecognizer, WakeDetector,
};
use ditty_radio::audio::{CommandSynthesizer, FfmpegTranscoder, Transcoder};
use ditty_radio::db::SqliteStore;
use ditty_radio::gateway::LocalGateway;
use ditty_radio::playback::{ChannelSession, SessionDeps, Station};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Wake-word frame: 32 ms at 16 kHz
const DETECTOR_FRAME_LENGTH: usize = 512;
const DETECTOR_SAMPLE_RATE: u32 = 16_000;
const DETECTOR_THRESHOLD: i16 = 4_000;

/// Command-line arguments for ditty-radio
#[derive(Parser, Debug)]
#[command(name = "ditty-radio")]
#[command(about = "Voice channel radio station")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "DITTY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config)
    #[arg(short, long, env = "DITTY_DATABASE")]
    database: Option<PathBuf>,

    /// Channel to stream (overrides config)
    #[arg(long)]
    channel: Option<u64>,

    /// Encoder output: file path or URL (overrides config)
    #[arg(short, long, env = "DITTY_OUTPUT")]
    output: Option<String>,

    /// ffmpeg executable used for decoding and encoding
    #[arg(long, default_value = "ffmpeg", env = "DITTY_FFMPEG")]
    ffmpeg: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(channel) = args.channel {
        config.channel_id = channel;
    }
    if let Some(output) = args.output {
        config.output = Some(output);
    }

    init_tracing(&config)?;

    info!(
        "Starting Ditty Radio {} ({}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let output = config
        .output
        .clone()
        .context("No output configured; set `output` or pass --output")?;
    let channel = ChannelId(config.channel_id);

    let store = SqliteStore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("Database: {}", config.database_path.display());

    let mut ffmpeg = FfmpegTranscoder::new(&args.ffmpeg);
    if let Some(dir) = &config.audio_cache_dir {
        ffmpeg = ffmpeg.with_media_dir(dir);
    }
    let transcoder: Arc<dyn Transcoder> = Arc::new(ffmpeg);
    let synthesizer = CommandSynthesizer::new(config.tts.clone(), Arc::clone(&transcoder));
    synthesizer
        .clear_scratch()
        .await
        .context("Failed to clear TTS scratch directory")?;

    let assistant = match config.recognizer.api_token {
        Some(_) => {
            let recognizer = HttpRecognizer::new(&config.recognizer).context("Failed to build recognizer")?;
            info!("Voice assistant enabled ({})", recognizer.url());
            let detectors: Arc<dyn DetectorFactory> = Arc::new(energy_detector);
            Some(AssistantServices {
                recognizer: Arc::new(recognizer),
                detectors,
                config: config.recognizer.clone(),
            })
        }
        None => {
            info!("No recognizer token configured, voice assistant disabled");
            None
        }
    };

    let events = EventBus::new(256);
    let log_task = tokio::spawn(log_station_events(events.clone()));

    let session = ChannelSession::new(
        channel,
        config.station.clone(),
        SessionDeps {
            gateway: Arc::new(LocalGateway::new(&args.ffmpeg, output, config.station.frame_bytes)),
            store: Arc::new(store),
            transcoder,
            synthesizer: Arc::new(synthesizer),
            assistant,
            events,
        },
    );
    let station = Station::new(session);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    station.run(shutdown).await.context("Station failed")?;
    log_task.abort();

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.logging.level)));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn energy_detector() -> ditty_radio::Result<Box<dyn WakeDetector>> {
    Ok(Box::new(EnergyDetector::new(
        DETECTOR_FRAME_LENGTH,
        DETECTOR_SAMPLE_RATE,
        DETECTOR_THRESHOLD,
    )))
}

async fn log_station_events(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!("Station event: {}", json),
                Err(e) => warn!("Failed to serialize station event: {}", e),
            },
            Err(RecvError::Lagged(missed)) => warn!("Event log missed {} events", missed),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
