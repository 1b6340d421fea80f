//! HTML pushes on the VIEW channel.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::channel::{ChannelKind, Frame};
use crate::error::CoreError;
use crate::hub::Hub;
use crate::transport::ChannelHandle;

pub struct ViewService {
    hub: Arc<Hub>,
    current: RwLock<Option<String>>,
}

impl ViewService {
    pub(crate) fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            current: RwLock::new(None),
        }
    }

    /// Replace the page content.
    ///
    /// The HTML is remembered even when no client is connected, so the next
    /// client to open the view channel starts from it.
    pub async fn update(&self, html: String) -> Result<(), CoreError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(html.clone());
        let handle = self.hub.ready_handle(ChannelKind::View)?;
        self.hub.transport.send(&handle, Frame::Text(html)).await?;
        debug!("View updated");
        Ok(())
    }

    /// The most recent HTML passed to `update`.
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue the remembered HTML on a freshly opened view channel.
    pub(crate) fn replay(&self, handle: &ChannelHandle) {
        let Some(html) = self.current() else {
            return;
        };
        match self.hub.transport.try_send(handle, Frame::Text(html)) {
            Ok(()) => debug!("Replayed current view to new client"),
            Err(e) => warn!("Could not replay current view: {}", e),
        }
    }
}
