//! Sync-to-async bridge.
//!
//! The core's async machinery lives on a dedicated thread running a
//! current-thread tokio runtime. Callers on any thread hand it [`WorkItem`]s;
//! each item carries the responder that settles the caller's [`Pending`].
//!
//! Items are routed to one lane per channel. A lane runs its items strictly in
//! submission order, one at a time; lanes run concurrently, so a slow capture
//! start or a delayed clip never holds back a view update.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::FrameProcessor;
use crate::channel::ChannelKind;
use crate::error::CoreError;
use crate::pending::{Pending, Responder};
use crate::playback::{AudioPayload, PlaybackToken};

const RUNTIME_THREAD_NAME: &str = "webview-runtime";

/// A unit of work for the runtime, with the responder that settles it.
pub enum WorkItem {
    UpdateView {
        html: String,
        respond_to: Responder<()>,
    },
    PlayAudio {
        payload: AudioPayload,
        token: PlaybackToken,
        respond_to: Responder<PlaybackToken>,
    },
    StartRecording {
        processor: Box<dyn FrameProcessor>,
        respond_to: Responder<()>,
    },
    StopRecording {
        respond_to: Responder<()>,
    },
}

impl WorkItem {
    pub fn update_view(html: String) -> (Self, Pending<()>) {
        let (respond_to, pending) = Pending::channel();
        (Self::UpdateView { html, respond_to }, pending)
    }

    pub fn play_audio(payload: AudioPayload) -> (Self, Pending<PlaybackToken>) {
        let (respond_to, pending) = Pending::channel();
        let item = Self::PlayAudio {
            payload,
            token: PlaybackToken::new(),
            respond_to,
        };
        (item, pending)
    }

    pub fn start_recording(processor: Box<dyn FrameProcessor>) -> (Self, Pending<()>) {
        let (respond_to, pending) = Pending::channel();
        (
            Self::StartRecording {
                processor,
                respond_to,
            },
            pending,
        )
    }

    pub fn stop_recording() -> (Self, Pending<()>) {
        let (respond_to, pending) = Pending::channel();
        (Self::StopRecording { respond_to }, pending)
    }

    /// The lane this item runs on.
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::UpdateView { .. } => ChannelKind::View,
            Self::PlayAudio { .. } => ChannelKind::Playback,
            Self::StartRecording { .. } | Self::StopRecording { .. } => ChannelKind::Capture,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateView { .. } => "update_view",
            Self::PlayAudio { .. } => "play_audio",
            Self::StartRecording { .. } => "start_recording",
            Self::StopRecording { .. } => "stop_recording",
        }
    }

    /// Settle the item with `err` without running it.
    pub fn settle(self, err: CoreError) {
        // A dropped Pending means nobody is waiting; that is fine.
        match self {
            Self::UpdateView { respond_to, .. }
            | Self::StartRecording { respond_to, .. }
            | Self::StopRecording { respond_to } => {
                let _ = respond_to.send(Err(err));
            }
            Self::PlayAudio { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("name", &self.name())
            .field("channel", &self.channel())
            .finish()
    }
}

/// Runs work items on the runtime thread.
///
/// `execute` must settle the item's responder. `cancel` fires on shutdown;
/// long waits inside an item should select on it.
pub trait WorkExecutor: Send + Sync + 'static {
    fn execute<'a>(&'a self, item: WorkItem, cancel: &'a CancellationToken) -> BoxFuture<'a, ()>;
}

struct Running {
    lanes: HashMap<ChannelKind, mpsc::UnboundedSender<WorkItem>>,
    cancel: CancellationToken,
    runtime: Handle,
    thread: std::thread::JoinHandle<()>,
}

pub struct Bridge {
    running: Mutex<Option<Running>>,
    shutdown_timeout: Duration,
}

impl Bridge {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            running: Mutex::new(None),
            shutdown_timeout,
        }
    }

    /// Spawn the runtime thread and its lanes.
    pub fn start(&self, executor: Arc<dyn WorkExecutor>) -> Result<Handle, CoreError> {
        let mut running = self.lock();
        if running.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let mut lanes = HashMap::new();
        let mut queues = Vec::new();
        for kind in ChannelKind::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(kind, tx);
            queues.push((kind, rx));
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let lane_cancel = cancel.clone();
        let shutdown_timeout = self.shutdown_timeout;

        let thread = std::thread::Builder::new()
            .name(RUNTIME_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                runtime.block_on(async move {
                    let lanes: Vec<_> = queues
                        .into_iter()
                        .map(|(kind, queue)| {
                            tokio::spawn(run_lane(
                                kind,
                                queue,
                                executor.clone(),
                                lane_cancel.clone(),
                            ))
                        })
                        .collect();
                    for lane in lanes {
                        if let Err(e) = lane.await {
                            warn!("Lane task failed: {}", e);
                        }
                    }
                });
                runtime.shutdown_timeout(shutdown_timeout);
                debug!("Runtime thread exiting");
            })
            .map_err(|e| CoreError::Runtime(format!("failed to spawn runtime thread: {e}")))?;

        let runtime = ready_rx
            .recv()
            .map_err(|_| CoreError::Runtime("runtime thread exited during startup".into()))?
            .map_err(CoreError::Runtime)?;

        *running = Some(Running {
            lanes,
            cancel,
            runtime: runtime.clone(),
            thread,
        });
        info!("Runtime started on thread {}", RUNTIME_THREAD_NAME);
        Ok(runtime)
    }

    /// Queue `item` on its lane. Never blocks; failures settle the item.
    pub fn submit(&self, item: WorkItem) {
        let running = self.lock();
        let Some(running) = running.as_ref() else {
            item.settle(CoreError::RuntimeNotStarted);
            return;
        };
        match running.lanes.get(&item.channel()) {
            Some(lane) => {
                if let Err(mpsc::error::SendError(item)) = lane.send(item) {
                    item.settle(CoreError::Cancelled);
                }
            }
            None => item.settle(CoreError::RuntimeNotStarted),
        }
    }

    /// Cancel queued work and join the runtime thread.
    ///
    /// The item each lane is currently running gets to finish; everything
    /// still queued settles with `Cancelled`.
    pub fn shutdown(&self) -> Result<(), CoreError> {
        let running = self.lock().take().ok_or(CoreError::RuntimeNotStarted)?;
        info!("Stopping runtime");
        running.cancel.cancel();
        drop(running.lanes);

        if std::thread::current().id() == running.thread.thread().id() {
            warn!("Runtime stopped from its own thread; not joining");
            return Ok(());
        }
        running
            .thread
            .join()
            .map_err(|_| CoreError::Runtime("runtime thread panicked".into()))?;
        info!("Runtime stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    pub fn runtime_handle(&self) -> Option<Handle> {
        self.lock().as_ref().map(|r| r.runtime.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.shutdown() {
                warn!("Runtime shutdown on drop failed: {}", e);
            }
        }
    }
}

async fn run_lane(
    kind: ChannelKind,
    mut queue: mpsc::UnboundedReceiver<WorkItem>,
    executor: Arc<dyn WorkExecutor>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        debug!("{} lane running {}", kind, item.name());
        executor.execute(item, &cancel).await;
    }

    queue.close();
    let mut cancelled = 0usize;
    while let Ok(item) = queue.try_recv() {
        item.settle(CoreError::Cancelled);
        cancelled += 1;
    }
    if cancelled > 0 {
        info!("{} lane cancelled {} queued items", kind, cancelled);
    }
    debug!("{} lane exiting", kind);
}
