//! Error taxonomy for the session core.

use crate::channel::ChannelKind;
use crate::registry::SessionId;

/// Errors surfaced by the session core.
///
/// Failures produced on the runtime are delivered through completion handles
/// ([`crate::Pending`]), never as panics across the thread boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("{0} channel is not connected")]
    NotConnected(ChannelKind),

    #[error("timed out sending on the {0} channel")]
    SendTimeout(ChannelKind),

    #[error("{0} channel closed")]
    ChannelClosed(ChannelKind),

    #[error("{0} channel already has a live connection")]
    AlreadyOpen(ChannelKind),

    #[error("session {active} is already connected")]
    ExistingSession { active: SessionId },

    #[error("runtime is already running")]
    AlreadyRunning,

    #[error("runtime has not been started")]
    RuntimeNotStarted,

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl CoreError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::SendTimeout(_) => "send_timeout",
            Self::ChannelClosed(_) => "channel_closed",
            Self::AlreadyOpen(_) => "already_open",
            Self::ExistingSession { .. } => "existing_session",
            Self::AlreadyRunning => "already_running",
            Self::RuntimeNotStarted => "runtime_not_started",
            Self::AlreadyRecording => "already_recording",
            Self::NotRecording => "not_recording",
            Self::Cancelled => "cancelled",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Runtime(_) => "runtime",
        }
    }

    /// Whether the caller may retry once the client (re)connects.
    ///
    /// The core itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::SendTimeout(_) | Self::ChannelClosed(_)
        )
    }

    /// The channel this error concerns, if any.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            Self::NotConnected(kind)
            | Self::SendTimeout(kind)
            | Self::ChannelClosed(kind)
            | Self::AlreadyOpen(kind) => Some(*kind),
            _ => None,
        }
    }
}
