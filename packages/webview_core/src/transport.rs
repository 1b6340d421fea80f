//! Channel transport: one socket per logical channel for the active client.
//!
//! Each opened channel gets a writer task draining a bounded outbound queue
//! into the socket, and a reader task pushing inbound frames into a bounded
//! inbound queue. Both tasks share a cancellation token that doubles as the
//! channel's closed flag.
//!
//! A full inbound queue only pauses socket reads while an
//! [`InboundConsumer`] is attached. Without one, surplus frames are dropped
//! so the reader keeps seeing the end of the stream.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelKind, Frame};
use crate::error::CoreError;
use crate::registry::SessionId;

/// Bound on closing a socket sink after the writer stops.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Upper bound for queueing a frame
    pub send_timeout: Duration,
    /// Upper bound for a single socket write; exceeding it closes the channel
    pub write_timeout: Duration,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            outbound_capacity: 64,
            inbound_capacity: 256,
        }
    }
}

/// Handle to one open channel socket.
///
/// Cheap to clone; all clones observe the same closed state.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    kind: ChannelKind,
    generation: u64,
    session_id: SessionId,
    outbound: mpsc::Sender<Frame>,
    inbound: Arc<Mutex<mpsc::Receiver<Frame>>>,
    consuming: Arc<watch::Sender<bool>>,
    closed: CancellationToken,
}

impl ChannelHandle {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Monotonic id distinguishing successive connections of the same channel.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Resolves once the channel has closed, from either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Claim the inbound queue. Socket reads wait for room while the
    /// returned guard is alive.
    pub fn consume_inbound(&self) -> InboundConsumer {
        self.consuming.send_replace(true);
        InboundConsumer {
            consuming: self.consuming.clone(),
        }
    }
}

/// Guard returned by [`ChannelHandle::consume_inbound`].
#[derive(Debug)]
pub struct InboundConsumer {
    consuming: Arc<watch::Sender<bool>>,
}

impl Drop for InboundConsumer {
    fn drop(&mut self) {
        self.consuming.send_replace(false);
    }
}

pub struct ChannelTransport {
    config: TransportConfig,
    slots: RwLock<HashMap<ChannelKind, ChannelHandle>>,
    next_generation: AtomicU64,
}

impl ChannelTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Bind an accepted socket to `kind`.
    ///
    /// Fails with `AlreadyOpen` while a live handle exists for `kind`, unless
    /// `reset` is set, in which case the old handle is closed first. Must be
    /// called from within the runtime that will drive the socket.
    pub fn open<Si, St, E>(
        &self,
        kind: ChannelKind,
        session_id: SessionId,
        sink: Si,
        stream: St,
        reset: bool,
    ) -> Result<ChannelHandle, CoreError>
    where
        Si: Sink<Frame> + Send + Unpin + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = slots.get(&kind) {
            if existing.is_open() {
                if !reset {
                    return Err(CoreError::AlreadyOpen(kind));
                }
                info!(
                    "Resetting {} channel of session {}",
                    kind, existing.session_id
                );
                existing.closed.cancel();
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let (consuming_tx, consuming_rx) = watch::channel(false);
        let closed = CancellationToken::new();

        let handle = ChannelHandle {
            kind,
            generation,
            session_id,
            outbound: outbound_tx,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            consuming: Arc::new(consuming_tx),
            closed: closed.clone(),
        };

        tokio::spawn(write_loop(
            kind,
            sink,
            outbound_rx,
            closed.clone(),
            self.config.write_timeout,
        ));
        tokio::spawn(read_loop(kind, stream, inbound_tx, consuming_rx, closed));

        info!(
            "Opened {} channel (generation {}) for session {}",
            kind, generation, handle.session_id
        );
        slots.insert(kind, handle.clone());
        Ok(handle)
    }

    /// Queue a frame for the socket.
    ///
    /// Returns once the frame is queued; waits at most `send_timeout` for
    /// room in the queue.
    pub async fn send(&self, handle: &ChannelHandle, frame: Frame) -> Result<(), CoreError> {
        if !handle.is_open() {
            return Err(CoreError::ChannelClosed(handle.kind));
        }
        match handle
            .outbound
            .send_timeout(frame, self.config.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("{} channel outbound queue full", handle.kind);
                Err(CoreError::SendTimeout(handle.kind))
            }
            Err(SendTimeoutError::Closed(_)) => Err(CoreError::ChannelClosed(handle.kind)),
        }
    }

    /// Queue a frame only if there is room right now.
    pub fn try_send(&self, handle: &ChannelHandle, frame: Frame) -> Result<(), CoreError> {
        if !handle.is_open() {
            return Err(CoreError::ChannelClosed(handle.kind));
        }
        handle.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CoreError::SendTimeout(handle.kind),
            mpsc::error::TrySendError::Closed(_) => CoreError::ChannelClosed(handle.kind),
        })
    }

    /// Wait for the next inbound frame.
    ///
    /// `Ok(None)` marks the end of the stream: the socket closed while we were
    /// waiting. Calling this on a handle that is already closed and drained
    /// fails with `ChannelClosed`.
    pub async fn receive(&self, handle: &ChannelHandle) -> Result<Option<Frame>, CoreError> {
        let mut inbound = handle.inbound.lock().await;
        if !handle.is_open() {
            return inbound
                .try_recv()
                .map(Some)
                .map_err(|_| CoreError::ChannelClosed(handle.kind));
        }
        Ok(inbound.recv().await)
    }

    /// Take an already-buffered inbound frame without waiting.
    pub fn try_receive(&self, handle: &ChannelHandle) -> Option<Frame> {
        let mut inbound = handle.inbound.try_lock().ok()?;
        inbound.try_recv().ok()
    }

    /// Close a channel. The slot is released if it still holds this handle.
    pub fn close(&self, handle: &ChannelHandle) {
        handle.closed.cancel();
        self.release(handle.kind, handle.generation);
    }

    /// Forget the slot for `kind` if it still belongs to `generation`.
    pub fn release(&self, kind: ChannelKind, generation: u64) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(&kind).is_some_and(|h| h.generation == generation) {
            slots.remove(&kind);
            debug!("Released {} channel slot (generation {})", kind, generation);
        }
    }

    pub fn close_all(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for (kind, handle) in slots.drain() {
            handle.closed.cancel();
            debug!("Closed {} channel", kind);
        }
    }

    /// The live handle bound to `kind`, if any.
    pub fn handle(&self, kind: ChannelKind) -> Option<ChannelHandle> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&kind).filter(|h| h.is_open()).cloned()
    }

    pub fn is_open(&self, kind: ChannelKind) -> bool {
        self.handle(kind).is_some()
    }
}

async fn write_loop<Si>(
    kind: ChannelKind,
    mut sink: Si,
    mut queue: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    write_timeout: Duration,
) where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match tokio::time::timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("{} channel write failed: {}", kind, e);
                break;
            }
            Err(_) => {
                warn!(
                    "{} channel write exceeded {:?}, closing channel",
                    kind, write_timeout
                );
                break;
            }
        }
    }

    closed.cancel();
    let _ = tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await;
    debug!("{} channel writer exiting", kind);
}

async fn read_loop<St, E>(
    kind: ChannelKind,
    mut stream: St,
    inbound: mpsc::Sender<Frame>,
    mut consuming: watch::Receiver<bool>,
    closed: CancellationToken,
) where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let mut dropped: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if !kind.keeps_inbound() {
                    debug!("Ignoring inbound frame on {} channel", kind);
                    continue;
                }
                if !*consuming.borrow() {
                    match inbound.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped += 1;
                            if dropped == 1 {
                                debug!("{} channel has no reader; dropping inbound frames", kind);
                            }
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                    continue;
                }
                // A full queue pauses socket reads until the consumer catches up.
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => break,
                    sent = inbound.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = until_released(&mut consuming) => {
                        dropped += 1;
                        debug!("{} channel reader released; dropped a waiting frame", kind);
                    }
                }
            }
            Some(Err(e)) => {
                debug!("{} channel read failed: {}", kind, e);
                break;
            }
            None => {
                debug!("{} channel stream ended", kind);
                break;
            }
        }
    }

    closed.cancel();
    if dropped > 0 {
        debug!("{} channel reader exiting ({} frames dropped)", kind, dropped);
    } else {
        debug!("{} channel reader exiting", kind);
    }
}

async fn until_released(consuming: &mut watch::Receiver<bool>) {
    let _ = consuming.wait_for(|c| !*c).await;
}
