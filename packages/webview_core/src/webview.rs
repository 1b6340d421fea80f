//! The `WebviewCore` facade.
//!
//! Owns the runtime bridge and the three channel services. Host code drives it
//! from plain threads through the blocking operations, or from async code
//! through the `*_async` variants; both go through the same submission path.

use futures::future::BoxFuture;
use futures::{Sink, Stream};
use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, WorkExecutor, WorkItem};
use crate::capture::{CaptureSession, CaptureStats, FrameProcessor, RecordingState};
use crate::channel::{ChannelKind, Frame};
use crate::config::{CoreConfig, WebviewConfig, WebviewSettings};
use crate::error::CoreError;
use crate::hub::Hub;
use crate::pending::Pending;
use crate::playback::{AudioPayload, PlaybackService, PlaybackStatus, PlaybackToken};
use crate::registry::{Admission, Session, SessionId};
use crate::transport::ChannelHandle;
use crate::view::ViewService;

struct Services {
    hub: Arc<Hub>,
    view: ViewService,
    playback: Arc<PlaybackService>,
    capture: CaptureSession,
}

impl Services {
    /// Bind an accepted socket to the session. Runs on the runtime thread and
    /// never awaits, so admission, binding and replay happen as one step.
    fn attach<Si, St, E>(
        &self,
        kind: ChannelKind,
        session_id: SessionId,
        sink: Si,
        stream: St,
    ) -> Result<ChannelHandle, CoreError>
    where
        Si: Sink<Frame> + Send + Unpin + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let admission = self.hub.with_registry(|r| r.admit(kind, &session_id))?;
        // Replacement only happens once every old channel is down.
        let replacing = matches!(admission, Admission::Replaced { .. });
        if replacing {
            self.capture.reset();
        }

        let handle = self
            .hub
            .transport
            .open(kind, session_id.clone(), sink, stream, replacing)?;
        if kind == ChannelKind::View {
            self.view.replay(&handle);
        }
        if let Err(e) = self
            .hub
            .with_registry(|r| r.register(kind, &session_id, handle.generation()))
        {
            self.hub.transport.close(&handle);
            return Err(e);
        }

        let hub = self.hub.clone();
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.closed().await;
            let generation = watched.generation();
            hub.with_registry(|r| r.mark_closed(kind, watched.session_id(), generation));
            hub.transport.release(kind, generation);
        });

        if kind == ChannelKind::Playback {
            tokio::spawn(self.playback.clone().listen(handle.clone()));
        }

        info!("Session {} connected {} channel", session_id, kind);
        Ok(handle)
    }

    fn reset(&self) {
        self.capture.reset();
        self.hub.transport.close_all();
        if let Some(session) = self.hub.with_registry(|r| r.clear()) {
            debug!("Dropped session {}", session.id);
        }
    }
}

impl WorkExecutor for Services {
    fn execute<'a>(&'a self, item: WorkItem, cancel: &'a CancellationToken) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let name = item.name();
            match item {
                WorkItem::UpdateView { html, respond_to } => {
                    let result = self.view.update(html).await;
                    log_outcome(name, &result);
                    let _ = respond_to.send(result);
                }
                WorkItem::PlayAudio {
                    payload,
                    token,
                    respond_to,
                } => {
                    let result = self.playback.play(payload, token, cancel).await;
                    log_outcome(name, &result);
                    let _ = respond_to.send(result);
                }
                WorkItem::StartRecording {
                    processor,
                    respond_to,
                } => {
                    let result = self.capture.start(processor).await;
                    log_outcome(name, &result);
                    let _ = respond_to.send(result);
                }
                WorkItem::StopRecording { respond_to } => {
                    let result = self.capture.stop().await;
                    log_outcome(name, &result);
                    let _ = respond_to.send(result);
                }
            }
        })
    }
}

fn log_outcome<T>(name: &str, result: &Result<T, CoreError>) {
    if let Err(e) = result {
        if e.is_recoverable() {
            debug!("{} failed: {}", name, e);
        } else {
            warn!("{} failed: {}", name, e);
        }
    }
}

/// A single-client browser session with VIEW, PLAYBACK and CAPTURE channels.
pub struct WebviewCore {
    config: CoreConfig,
    settings: RwLock<WebviewSettings>,
    bridge: Bridge,
    services: Arc<Services>,
}

impl WebviewCore {
    pub fn new(config: WebviewConfig) -> Self {
        let WebviewConfig { settings, core } = config;
        let hub = Arc::new(Hub::new(core.transport()));
        let services = Arc::new(Services {
            view: ViewService::new(hub.clone()),
            playback: Arc::new(PlaybackService::new(hub.clone(), core.playback_history)),
            capture: CaptureSession::new(hub.clone(), core.frame_queue_capacity),
            hub,
        });
        Self {
            bridge: Bridge::new(core.shutdown_timeout()),
            config: core,
            settings: RwLock::new(settings),
            services,
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the runtime thread. Fails with `AlreadyRunning` if started.
    pub fn start(&self) -> Result<(), CoreError> {
        self.bridge.start(self.services.clone())?;
        Ok(())
    }

    /// Stop the runtime, cancel queued work and drop the session.
    ///
    /// Blocks until the runtime thread has exited. Call it from a plain
    /// thread, not from inside the runtime.
    pub fn stop(&self) -> Result<(), CoreError> {
        self.bridge.shutdown()?;
        self.services.reset();
        info!("Webview core stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.bridge.is_running()
    }

    /// Handle to the runtime, for hosts that serve sockets on it.
    pub fn runtime_handle(&self) -> Option<Handle> {
        self.bridge.runtime_handle()
    }

    pub fn configure(&self, settings: WebviewSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn settings(&self) -> WebviewSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Channel upgrades
    // -------------------------------------------------------------------------

    /// Attach an accepted socket as channel `kind` of session `session_id`.
    ///
    /// Fails with `ExistingSession` while another client has any live
    /// channel, or `AlreadyOpen` when this client already has `kind` open.
    pub fn connect<Si, St, E>(
        &self,
        kind: ChannelKind,
        session_id: SessionId,
        sink: Si,
        stream: St,
    ) -> Pending<ChannelHandle>
    where
        Si: Sink<Frame> + Send + Unpin + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let Some(runtime) = self.bridge.runtime_handle() else {
            return Pending::failed(CoreError::RuntimeNotStarted);
        };
        let (respond_to, pending) = Pending::channel();
        let services = self.services.clone();
        runtime.spawn(async move {
            let result = services.attach(kind, session_id, sink, stream);
            if let Err(e) = &result {
                info!("Rejected {} connection: {}", kind, e);
            }
            let _ = respond_to.send(result);
        });
        pending
    }

    // -------------------------------------------------------------------------
    // Host operations
    // -------------------------------------------------------------------------

    /// Replace the page content and wait until it is queued for the client.
    pub fn update_view(&self, html: impl Into<String>) -> Result<(), CoreError> {
        self.update_view_async(html).wait()
    }

    pub fn update_view_async(&self, html: impl Into<String>) -> Pending<()> {
        self.submit(WorkItem::update_view(html.into()))
    }

    /// Send a clip to the browser, after its delay if it has one.
    pub fn play_audio(&self, payload: AudioPayload) -> Result<PlaybackToken, CoreError> {
        self.play_audio_async(payload).wait()
    }

    pub fn play_audio_async(&self, payload: AudioPayload) -> Pending<PlaybackToken> {
        self.submit(WorkItem::play_audio(payload))
    }

    pub fn start_recording(&self, processor: impl FrameProcessor) -> Result<(), CoreError> {
        self.start_recording_async(processor).wait()
    }

    pub fn start_recording_async(&self, processor: impl FrameProcessor) -> Pending<()> {
        self.submit(WorkItem::start_recording(Box::new(processor)))
    }

    pub fn stop_recording(&self) -> Result<(), CoreError> {
        self.stop_recording_async().wait()
    }

    pub fn stop_recording_async(&self) -> Pending<()> {
        self.submit(WorkItem::stop_recording())
    }

    fn submit<T>(&self, (item, pending): (WorkItem, Pending<T>)) -> Pending<T> {
        self.bridge.submit(item);
        pending
    }

    // -------------------------------------------------------------------------
    // Snapshots, safe from any thread
    // -------------------------------------------------------------------------

    pub fn is_ready(&self, kind: ChannelKind) -> bool {
        self.services.hub.is_ready(kind)
    }

    pub fn session(&self) -> Option<Session> {
        self.services.hub.session()
    }

    pub fn current_view(&self) -> Option<String> {
        self.services.view.current()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.services.capture.state()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.services.capture.stats()
    }

    pub fn playback_status(&self, token: PlaybackToken) -> Option<PlaybackStatus> {
        self.services.playback.status(token)
    }
}

impl Drop for WebviewCore {
    fn drop(&mut self) {
        if self.bridge.is_running() {
            if let Err(e) = self.stop() {
                warn!("Stopping webview core on drop failed: {}", e);
            }
        }
    }
}
