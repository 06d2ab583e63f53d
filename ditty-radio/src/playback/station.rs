//! Station supervisor
//!
//! Keeps a channel session running: when the session's worker stops without
//! a shutdown request (sink lost, fatal error, panic) it is restarted after
//! `restart_delay`.

use super::channel::ChannelSession;
use super::controls::ChannelControls;
use crate::error::Result;
use crate::worker::{Worker, WorkerEvent, WorkerOutcome};
use chrono::Utc;
use ditty_common::events::{EventBus, StationEvent};
use ditty_common::ChannelId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Station {
    channel: ChannelId,
    worker: Worker<ChannelSession>,
    controls: Arc<ChannelControls>,
    events: EventBus,
    restart_delay: Duration,
}

impl Station {
    pub fn new(session: ChannelSession) -> Self {
        let channel = session.channel_id();
        let controls = session.controls();
        let events = session.events().clone();
        let restart_delay = session.config().restart_delay();
        Self {
            channel,
            worker: Worker::new(format!("channel-{}", channel), session),
            controls,
            events,
            restart_delay,
        }
    }

    pub fn controls(&self) -> Arc<ChannelControls> {
        Arc::clone(&self.controls)
    }

    pub fn worker(&self) -> &Worker<ChannelSession> {
        &self.worker
    }

    /// Run the channel session until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut lifecycle = self.worker.subscribe();
        self.worker.start()?;
        info!(channel = %self.channel, "Station started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = lifecycle.recv() => event,
            };

            match event {
                Ok(WorkerEvent::Started) => {
                    info!(channel = %self.channel, "Channel session running");
                }
                Ok(WorkerEvent::Stopped(outcome)) => {
                    let error = match outcome {
                        WorkerOutcome::Failed(message) => Some(message),
                        WorkerOutcome::Completed | WorkerOutcome::Cancelled => None,
                    };
                    warn!(
                        channel = %self.channel,
                        error = ?error,
                        "Channel session stopped, restarting in {:?}",
                        self.restart_delay
                    );
                    self.events.emit_lossy(StationEvent::SessionStopped {
                        channel_id: self.channel,
                        error,
                        timestamp: Utc::now(),
                    });

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.restart_delay) => {}
                    }
                    if !self.worker.try_ensure_started() {
                        warn!(channel = %self.channel, "Channel session could not be restarted");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(channel = %self.channel, "Missed {} worker events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!(channel = %self.channel, "Station shutting down");
        self.worker.shutdown().await;
        Ok(())
    }
}
