use std::sync::{PoisonError, RwLock};

use crate::channel::ChannelKind;
use crate::error::CoreError;
use crate::registry::{Session, SessionRegistry};
use crate::transport::{ChannelHandle, ChannelTransport, TransportConfig};

/// Registry and transport shared by the services.
pub(crate) struct Hub {
    registry: RwLock<SessionRegistry>,
    pub(crate) transport: ChannelTransport,
}

impl Hub {
    pub(crate) fn new(transport: TransportConfig) -> Self {
        Self {
            registry: RwLock::new(SessionRegistry::new()),
            transport: ChannelTransport::new(transport),
        }
    }

    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&mut SessionRegistry) -> R) -> R {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    pub(crate) fn is_ready(&self, kind: ChannelKind) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_ready(kind)
    }

    pub(crate) fn session(&self) -> Option<Session> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session()
            .cloned()
    }

    /// The live handle for `kind`, or `NotConnected`.
    pub(crate) fn ready_handle(&self, kind: ChannelKind) -> Result<ChannelHandle, CoreError> {
        if !self.is_ready(kind) {
            return Err(CoreError::NotConnected(kind));
        }
        self.transport
            .handle(kind)
            .ok_or(CoreError::NotConnected(kind))
    }
}
