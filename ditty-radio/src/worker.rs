//! Supervised background tasks
//!
//! A [`Worker`] owns one long-running [`WorkerTask`] and its lifecycle:
//!
//! **State machine:** Stopped → Starting → Running → Stopping → Stopped
//! - `start` is legal only from Stopped
//! - `stop` is legal only from Running; it cancels the task and waits for it
//! - a task that returns or fails on its own also lands in Stopped
//!
//! Every transition into Running emits [`WorkerEvent::Started`]; every
//! transition into Stopped emits exactly one [`WorkerEvent::Stopped`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Why a worker's task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Returned without being asked to stop
    Completed,
    /// Ended after cancellation
    Cancelled,
    /// Returned an error or panicked
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started,
    Stopped(WorkerOutcome),
}

/// Body of a worker; runs until completion or until `cancel` fires
#[async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()>;
}

struct Inner {
    status: WorkerStatus,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<WorkerStatus>,
    events: broadcast::Sender<WorkerEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, inner: &mut Inner, status: WorkerStatus) {
        inner.status = status;
        self.status_tx.send_replace(status);
    }

    fn mark_running(&self) {
        let mut inner = self.lock();
        if inner.status == WorkerStatus::Starting {
            self.set_status(&mut inner, WorkerStatus::Running);
            drop(inner);
            let _ = self.events.send(WorkerEvent::Started);
        }
    }

    fn mark_stopped(&self, outcome: WorkerOutcome) {
        let mut inner = self.lock();
        if inner.status == WorkerStatus::Stopped {
            return;
        }
        inner.cancel = None;
        inner.handle = None;
        self.set_status(&mut inner, WorkerStatus::Stopped);
        drop(inner);
        info!("Worker {} stopped ({:?})", self.name, outcome);
        let _ = self.events.send(WorkerEvent::Stopped(outcome));
    }
}

pub struct Worker<T: WorkerTask> {
    task: Arc<T>,
    shared: Arc<Shared>,
}

impl<T: WorkerTask> Worker<T> {
    pub fn new(name: impl Into<String>, task: T) -> Self {
        Self::from_arc(name, Arc::new(task))
    }

    pub fn from_arc(name: impl Into<String>, task: Arc<T>) -> Self {
        let (status_tx, _) = watch::channel(WorkerStatus::Stopped);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            task,
            shared: Arc::new(Shared {
                name: name.into(),
                inner: Mutex::new(Inner {
                    status: WorkerStatus::Stopped,
                    cancel: None,
                    handle: None,
                }),
                status_tx,
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.lock().status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<WorkerStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Launch the task; only legal while Stopped
    pub fn start(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.status != WorkerStatus::Stopped {
            return Err(Error::InvalidState(format!(
                "Worker {} cannot start while {:?}",
                self.shared.name, inner.status
            )));
        }
        self.shared.set_status(&mut inner, WorkerStatus::Starting);

        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());
        let shared = Arc::clone(&self.shared);
        let task = Arc::clone(&self.task);
        inner.handle = Some(tokio::spawn(supervise(shared, task, cancel)));
        drop(inner);

        info!("Worker {} starting", self.shared.name);
        Ok(())
    }

    /// Cancel the task and wait for it to finish; only legal while Running
    pub async fn stop(&self) -> Result<()> {
        let (cancel, handle) = {
            let mut inner = self.shared.lock();
            if inner.status != WorkerStatus::Running {
                return Err(Error::InvalidState(format!(
                    "Worker {} cannot stop while {:?}",
                    self.shared.name, inner.status
                )));
            }
            self.shared.set_status(&mut inner, WorkerStatus::Stopping);
            (inner.cancel.take(), inner.handle.take())
        };

        debug!("Worker {} stopping", self.shared.name);
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Worker {} supervisor failed: {}", self.shared.name, e);
                self.shared.mark_stopped(WorkerOutcome::Failed(e.to_string()));
            }
        }
        self.wait_stopped().await;
        Ok(())
    }

    /// True if the worker is (or is becoming) active
    pub fn try_ensure_started(&self) -> bool {
        match self.status() {
            WorkerStatus::Running | WorkerStatus::Starting => true,
            WorkerStatus::Stopped => self.start().is_ok(),
            WorkerStatus::Stopping => false,
        }
    }

    /// True if the worker is (or is becoming) inactive
    pub async fn try_ensure_stopped(&self) -> bool {
        match self.status() {
            WorkerStatus::Stopped | WorkerStatus::Stopping => true,
            WorkerStatus::Running => self.stop().await.is_ok(),
            WorkerStatus::Starting => false,
        }
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start()
    }

    pub async fn try_start_or_restart(&self) -> bool {
        self.try_ensure_stopped().await && self.try_ensure_started()
    }

    /// Stop from any state, waiting out Starting and Stopping
    pub async fn shutdown(&self) {
        let mut status = self.watch_status();
        loop {
            let current = *status.borrow_and_update();
            match current {
                WorkerStatus::Stopped => return,
                WorkerStatus::Running => {
                    if self.stop().await.is_ok() {
                        return;
                    }
                }
                WorkerStatus::Starting | WorkerStatus::Stopping => {
                    if status.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn wait_stopped(&self) {
        let mut status = self.watch_status();
        let result = status.wait_for(|s| *s == WorkerStatus::Stopped).await.map(|_| ());
        if let Err(e) = result {
            warn!("Worker {} status channel closed: {}", self.shared.name, e);
        }
    }
}

impl<T: WorkerTask> Drop for Worker<T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.shared.lock().cancel.as_ref() {
            cancel.cancel();
        }
    }
}

async fn supervise<T: WorkerTask>(shared: Arc<Shared>, task: Arc<T>, cancel: CancellationToken) {
    shared.mark_running();

    // Inner spawn turns a panicking task into a JoinError
    let outcome = match tokio::spawn(task.run(cancel.clone())).await {
        Ok(Ok(())) if cancel.is_cancelled() => WorkerOutcome::Cancelled,
        Ok(Ok(())) => WorkerOutcome::Completed,
        Ok(Err(e)) if e.is_cancelled() => WorkerOutcome::Cancelled,
        Ok(Err(e)) => {
            error!("Worker {} failed: {}", shared.name, e);
            WorkerOutcome::Failed(e.to_string())
        }
        Err(e) => {
            error!("Worker {} panicked: {}", shared.name, e);
            WorkerOutcome::Failed(e.to_string())
        }
    };

    shared.mark_stopped(outcome);
}
