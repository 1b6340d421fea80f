//! Single-client session bookkeeping.
//!
//! The registry decides which client may hold the channels. Exactly one
//! session exists at a time; a second client is turned away while any channel
//! of the first is live. Once every channel of the current session has dropped
//! a new client may take over, which is what a page reload looks like from
//! here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::channel::ChannelKind;
use crate::error::CoreError;

/// Opaque client session identifier, chosen by the page shell.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Per-channel liveness inside a session.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChannelStatus {
    pub live: bool,
    /// Transport generation currently bound to this channel
    pub generation: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// The one permitted client session.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub degraded: bool,
    channels: HashMap<ChannelKind, ChannelStatus>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            degraded: false,
            channels: ChannelKind::ALL
                .into_iter()
                .map(|kind| (kind, ChannelStatus::default()))
                .collect(),
        }
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelStatus {
        // Every kind is inserted in `Session::new`.
        &self.channels[&kind]
    }

    pub fn is_live(&self, kind: ChannelKind) -> bool {
        self.channel(kind).live
    }

    pub fn live_channels(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .filter(|kind| self.is_live(*kind))
            .collect()
    }

    /// A session with any live channel blocks newcomers.
    fn is_occupied(&self) -> bool {
        self.channels.values().any(|s| s.live)
    }

    fn bind(&mut self, kind: ChannelKind, generation: u64) {
        let status = self.channels.entry(kind).or_default();
        status.live = true;
        status.generation = generation;
        status.connected_at = Some(Utc::now());
        status.disconnected_at = None;
        // Degraded while any channel that was connected is still down.
        self.degraded = self
            .channels
            .values()
            .any(|s| !s.live && s.disconnected_at.is_some());
    }
}

/// Outcome of a successful registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// No session existed; this client now owns it.
    Created,
    /// The client already owns the session and added or re-opened a channel.
    Joined,
    /// A fully disconnected session from another client was discarded.
    Replaced { previous: SessionId },
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    current: Option<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `id` may open `kind`, without changing anything.
    pub fn admit(&self, kind: ChannelKind, id: &SessionId) -> Result<Admission, CoreError> {
        match self.current.as_ref() {
            None => Ok(Admission::Created),
            Some(session) if &session.id == id => Ok(Admission::Joined),
            Some(session) if session.is_occupied() => {
                debug!("Rejecting session {} on {}: {} is live", id, kind, session.id);
                Err(CoreError::ExistingSession {
                    active: session.id.clone(),
                })
            }
            Some(session) => Ok(Admission::Replaced {
                previous: session.id.clone(),
            }),
        }
    }

    /// Admit `id` onto `kind` with transport generation `generation`.
    pub fn register(
        &mut self,
        kind: ChannelKind,
        id: &SessionId,
        generation: u64,
    ) -> Result<Admission, CoreError> {
        let admission = self.admit(kind, id)?;

        if admission != Admission::Joined {
            if let Admission::Replaced { previous } = &admission {
                info!("Session {} replaces disconnected session {}", id, previous);
            } else {
                info!("Session {} created", id);
            }
            self.current = Some(Session::new(id.clone()));
        }

        if let Some(session) = self.current.as_mut() {
            session.bind(kind, generation);
        }
        Ok(admission)
    }

    /// Record that `kind` of session `id` disconnected.
    ///
    /// Returns false when the notification is stale (another session, or a
    /// newer generation already bound to the channel).
    pub fn mark_closed(&mut self, kind: ChannelKind, id: &SessionId, generation: u64) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        if &session.id != id {
            return false;
        }
        let status = session.channels.entry(kind).or_default();
        if status.generation != generation || !status.live {
            return false;
        }
        status.live = false;
        status.disconnected_at = Some(Utc::now());
        session.degraded = true;
        info!("Session {} lost its {} channel (degraded)", id, kind);
        true
    }

    pub fn is_ready(&self, kind: ChannelKind) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| session.is_live(kind))
    }

    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) -> Option<Session> {
        self.current.take()
    }
}
