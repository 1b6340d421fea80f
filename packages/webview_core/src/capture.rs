//! Microphone capture on the CAPTURE channel.
//!
//! `start` tells the browser to begin recording and hands every inbound
//! binary frame to a caller-supplied [`FrameProcessor`]. The processor runs
//! on a blocking worker fed through a bounded queue, so a slow or failing
//! processor never stalls the socket; frames that do not fit are dropped and
//! counted. Frames the browser sent before a recording started (late audio
//! from a previous one) are discarded when the next recording starts.

use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelKind, Frame};
use crate::error::CoreError;
use crate::hub::Hub;
use crate::protocol::CaptureCommand;
use crate::transport::{ChannelHandle, InboundConsumer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    /// Start command sent, no audio yet
    Armed,
    Recording,
    Stopping,
}

impl RecordingState {
    pub fn is_active(self) -> bool {
        matches!(self, RecordingState::Armed | RecordingState::Recording)
    }
}

/// Consumer of captured audio frames.
///
/// Called on a blocking worker thread, once per frame, in arrival order.
/// Errors and panics are logged and counted; the recording carries on.
pub trait FrameProcessor: Send + 'static {
    fn process(&mut self, frame: &[u8]) -> anyhow::Result<()>;
}

impl<F> FrameProcessor for F
where
    F: FnMut(&[u8]) -> anyhow::Result<()> + Send + 'static,
{
    fn process(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Frame counters for the current (or last) recording.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub frames_received: u64,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_received: self.received.load(Ordering::Relaxed),
            frames_processed: self.processed.load(Ordering::Relaxed),
            frames_failed: self.failed.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

struct ActiveRecording {
    id: u64,
    handle: ChannelHandle,
    stop: CancellationToken,
    receiver: JoinHandle<()>,
    worker: JoinHandle<()>,
}

struct Inner {
    state: RecordingState,
    active: Option<ActiveRecording>,
    next_id: u64,
}

pub struct CaptureSession {
    hub: Arc<Hub>,
    inner: Arc<Mutex<Inner>>,
    counters: Arc<Counters>,
    queue_capacity: usize,
}

impl CaptureSession {
    pub(crate) fn new(hub: Arc<Hub>, queue_capacity: usize) -> Self {
        Self {
            hub,
            inner: Arc::new(Mutex::new(Inner {
                state: RecordingState::Idle,
                active: None,
                next_id: 1,
            })),
            counters: Arc::new(Counters::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn state(&self) -> RecordingState {
        lock(&self.inner).state
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    pub async fn start(&self, processor: Box<dyn FrameProcessor>) -> Result<(), CoreError> {
        if lock(&self.inner).state != RecordingState::Idle {
            return Err(CoreError::AlreadyRecording);
        }
        let handle = self.hub.ready_handle(ChannelKind::Capture)?;
        self.send_command(&handle, CaptureCommand::StartRecording)
            .await?;

        let mut inner = lock(&self.inner);
        if inner.state != RecordingState::Idle {
            return Err(CoreError::AlreadyRecording);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        self.counters.reset();

        let consumer = handle.consume_inbound();
        let mut stale = 0usize;
        while self.hub.transport.try_receive(&handle).is_some() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} frames buffered before recording {}", stale, id);
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.queue_capacity);
        let counters = self.counters.clone();
        let worker =
            tokio::task::spawn_blocking(move || process_frames(processor, frames_rx, counters));

        let stop = CancellationToken::new();
        let receiver = tokio::spawn(receive_frames(
            id,
            self.hub.clone(),
            handle.clone(),
            consumer,
            stop.clone(),
            frames_tx,
            self.inner.clone(),
            self.counters.clone(),
        ));

        inner.state = RecordingState::Armed;
        inner.active = Some(ActiveRecording {
            id,
            handle,
            stop,
            receiver,
            worker,
        });
        info!("Recording armed (recording {})", id);
        Ok(())
    }

    /// Stop the recording and wait until every queued frame was processed.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let active = {
            let mut inner = lock(&self.inner);
            if !inner.state.is_active() {
                return Err(CoreError::NotRecording);
            }
            inner.state = RecordingState::Stopping;
            inner.active.take()
        };
        let Some(active) = active else {
            lock(&self.inner).state = RecordingState::Idle;
            return Ok(());
        };

        if active.handle.is_open() {
            if let Err(e) = self
                .send_command(&active.handle, CaptureCommand::StopRecording)
                .await
            {
                debug!("Could not send stop command: {}", e);
            }
        }
        active.stop.cancel();
        if let Err(e) = active.receiver.await {
            warn!("Capture receive loop failed: {}", e);
        }
        if let Err(e) = active.worker.await {
            warn!("Capture worker failed: {}", e);
        }

        lock(&self.inner).state = RecordingState::Idle;
        let stats = self.stats();
        info!(
            "Recording {} stopped: {} frames received, {} processed, {} failed, {} dropped",
            active.id,
            stats.frames_received,
            stats.frames_processed,
            stats.frames_failed,
            stats.frames_dropped
        );
        Ok(())
    }

    /// Abandon any recording without talking to the browser.
    pub(crate) fn reset(&self) {
        let mut inner = lock(&self.inner);
        if let Some(active) = inner.active.take() {
            active.stop.cancel();
            debug!("Recording {} abandoned", active.id);
        }
        inner.state = RecordingState::Idle;
    }

    async fn send_command(
        &self,
        handle: &ChannelHandle,
        command: CaptureCommand,
    ) -> Result<(), CoreError> {
        let json =
            serde_json::to_string(&command).map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        self.hub.transport.send(handle, Frame::Text(json)).await
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn process_frames(
    mut processor: Box<dyn FrameProcessor>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    counters: Arc<Counters>,
) {
    while let Some(frame) = frames.blocking_recv() {
        match std::panic::catch_unwind(AssertUnwindSafe(|| processor.process(&frame))) {
            Ok(Ok(())) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Frame processor failed on {} bytes: {:#}", frame.len(), e);
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Frame processor panicked on {} bytes", frame.len());
            }
        }
    }
    debug!("Capture worker exiting");
}

async fn receive_frames(
    id: u64,
    hub: Arc<Hub>,
    handle: ChannelHandle,
    consumer: InboundConsumer,
    stop: CancellationToken,
    frames: mpsc::Sender<Vec<u8>>,
    inner: Arc<Mutex<Inner>>,
    counters: Arc<Counters>,
) {
    let mut client_closed = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = hub.transport.receive(&handle) => next,
        };
        match next {
            Ok(Some(Frame::Binary(bytes))) => {
                mark_recording(&inner, id);
                forward(&frames, bytes, &counters);
            }
            Ok(Some(Frame::Text(text))) => {
                debug!("Ignoring {}-byte text frame on capture channel", text.len());
            }
            Ok(None) | Err(_) => {
                client_closed = true;
                break;
            }
        }
    }

    // Frames the socket already delivered still belong to this recording.
    while let Some(frame) = hub.transport.try_receive(&handle) {
        if let Frame::Binary(bytes) = frame {
            forward(&frames, bytes, &counters);
        }
    }
    drop(frames);
    drop(consumer);

    if client_closed {
        let mut inner = lock(&inner);
        if inner.state.is_active() && inner.active.as_ref().is_some_and(|a| a.id == id) {
            inner.state = RecordingState::Idle;
            inner.active = None;
            warn!("Capture channel closed during recording {}", id);
        }
    }
}

fn mark_recording(inner: &Mutex<Inner>, id: u64) {
    let mut inner = lock(inner);
    if inner.state == RecordingState::Armed && inner.active.as_ref().is_some_and(|a| a.id == id) {
        inner.state = RecordingState::Recording;
        info!("Recording {}: first audio frame received", id);
    }
}

fn forward(frames: &mpsc::Sender<Vec<u8>>, bytes: Vec<u8>, counters: &Counters) {
    counters.received.fetch_add(1, Ordering::Relaxed);
    match frames.try_send(bytes) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            if counters.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("Frame processor is falling behind; dropping audio frames");
            }
        }
        Err(TrySendError::Closed(_)) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
