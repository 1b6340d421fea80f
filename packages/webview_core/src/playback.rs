//! Audio playback on the PLAYBACK channel.
//!
//! Requests are serialized per channel by the bridge lane, so a delayed item
//! holds back later playback items while it waits. The wait never touches the
//! other channels. The browser acknowledges each clip with
//! `playback_complete`; those acks update a bounded status history keyed by
//! [`PlaybackToken`].

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelKind, Frame};
use crate::codec::{self, WAV_DATA_URL_PREFIX};
use crate::error::CoreError;
use crate::hub::Hub;
use crate::protocol::{PlaybackClientMessage, PlaybackServerMessage};
use crate::transport::ChannelHandle;

/// Identifies one playback request end to end.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackToken(Uuid);

impl PlaybackToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Base64 WAV data URL plus an optional delay before it is sent.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPayload {
    data: String,
    delay: Option<Duration>,
}

impl AudioPayload {
    pub fn from_wav_bytes(bytes: &[u8]) -> Self {
        Self {
            data: codec::wav_data_url(bytes),
            delay: None,
        }
    }

    /// Accepts bare base64 (assumed WAV) or a `data:<mime>;base64,` URL.
    pub fn from_base64(encoded: impl Into<String>) -> Result<Self, CoreError> {
        let encoded = encoded.into();
        let body = if encoded.starts_with("data:") {
            match encoded.split_once(";base64,") {
                Some((_, body)) => body,
                None => {
                    return Err(CoreError::InvalidPayload(
                        "data URL is not base64 encoded".into(),
                    ));
                }
            }
        } else {
            encoded.as_str()
        };
        if body.is_empty() {
            return Err(CoreError::InvalidPayload("audio data is empty".into()));
        }
        BASE64
            .decode(body.as_bytes())
            .map_err(|e| CoreError::InvalidPayload(format!("audio is not valid base64: {e}")))?;

        let data = if encoded.starts_with("data:") {
            encoded
        } else {
            format!("{WAV_DATA_URL_PREFIX}{encoded}")
        };
        Ok(Self { data, delay: None })
    }

    /// Hold the clip for `delay` before sending. A zero delay means none.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }

    pub fn with_delay_secs(self, secs: f64) -> Result<Self, CoreError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(CoreError::InvalidPayload(format!(
                "delay must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(self.with_delay(Duration::from_secs_f64(secs)))
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// Accepted and waiting out its delay
    Scheduled,
    /// Handed to the socket
    Sent,
    /// Browser reported the clip finished
    Completed,
    /// Sending failed, or the browser reported an error
    Failed,
    /// Dropped by shutdown before it was sent
    Cancelled,
}

struct History {
    order: VecDeque<PlaybackToken>,
    status: HashMap<PlaybackToken, PlaybackStatus>,
    capacity: usize,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            status: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn set(&mut self, token: PlaybackToken, status: PlaybackStatus) {
        if !self.status.contains_key(&token) {
            self.order.push_back(token);
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.status.remove(&oldest);
                }
            }
        }
        self.status.insert(token, status);
    }

    fn update(&mut self, token: PlaybackToken, status: PlaybackStatus) -> bool {
        match self.status.get_mut(&token) {
            Some(current) => {
                *current = status;
                true
            }
            None => false,
        }
    }
}

pub struct PlaybackService {
    hub: Arc<Hub>,
    history: Mutex<History>,
}

impl PlaybackService {
    pub(crate) fn new(hub: Arc<Hub>, history_capacity: usize) -> Self {
        Self {
            hub,
            history: Mutex::new(History::new(history_capacity)),
        }
    }

    /// Wait out the payload's delay, then send it to the browser.
    ///
    /// Fails fast with `NotConnected` when no playback channel is live at
    /// submission, and again if it dropped during the delay.
    pub async fn play(
        &self,
        payload: AudioPayload,
        token: PlaybackToken,
        cancel: &CancellationToken,
    ) -> Result<PlaybackToken, CoreError> {
        self.hub.ready_handle(ChannelKind::Playback)?;
        self.record(token, PlaybackStatus::Scheduled);

        if let Some(delay) = payload.delay() {
            debug!("Holding playback {} for {:?}", token, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    self.record(token, PlaybackStatus::Cancelled);
                    return Err(CoreError::Cancelled);
                }
            }
        }

        match self.dispatch(&payload, token).await {
            Ok(()) => {
                self.record(token, PlaybackStatus::Sent);
                Ok(token)
            }
            Err(e) => {
                self.record(token, PlaybackStatus::Failed);
                Err(e)
            }
        }
    }

    async fn dispatch(&self, payload: &AudioPayload, token: PlaybackToken) -> Result<(), CoreError> {
        let handle = self.hub.ready_handle(ChannelKind::Playback)?;
        let message = PlaybackServerMessage::Audio {
            id: token,
            data: payload.data().to_string(),
        };
        let json =
            serde_json::to_string(&message).map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        self.hub.transport.send(&handle, Frame::Text(json)).await?;
        debug!("Audio {} sent for playback", token);
        Ok(())
    }

    pub fn status(&self, token: PlaybackToken) -> Option<PlaybackStatus> {
        self.lock().status.get(&token).copied()
    }

    pub(crate) fn handle_client_frame(&self, frame: Frame) {
        let Some(text) = frame.as_text() else {
            debug!("Ignoring binary frame on playback channel");
            return;
        };
        match serde_json::from_str::<PlaybackClientMessage>(text) {
            Ok(PlaybackClientMessage::PlaybackComplete { id }) => {
                if self.lock().update(id, PlaybackStatus::Completed) {
                    info!("Playback {} completed", id);
                } else {
                    debug!("Completion for unknown playback {}", id);
                }
            }
            Ok(PlaybackClientMessage::PlaybackError { id, message }) => {
                self.lock().update(id, PlaybackStatus::Failed);
                warn!(
                    "Browser failed to play {}: {}",
                    id,
                    message.as_deref().unwrap_or("no detail")
                );
            }
            Err(e) => debug!("Unrecognised playback message: {}", e),
        }
    }

    /// Consume acknowledgements from one playback connection until it closes.
    pub(crate) async fn listen(self: Arc<Self>, handle: ChannelHandle) {
        let _consumer = handle.consume_inbound();
        while let Ok(Some(frame)) = self.hub.transport.receive(&handle).await {
            self.handle_client_frame(frame);
        }
        debug!(
            "Playback listener for generation {} exiting",
            handle.generation()
        );
    }

    fn record(&self, token: PlaybackToken, status: PlaybackStatus) {
        self.lock().set(token, status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
