//! Session core for a browser-as-display host.
//!
//! One browser client connects three WebSocket channels: VIEW (HTML pushed to
//! the page), PLAYBACK (audio clips played by the page) and CAPTURE
//! (microphone frames streamed back). [`WebviewCore`] owns a dedicated runtime
//! thread that drives those sockets, while host code calls it from ordinary
//! blocking threads:
//!
//! ```no_run
//! use webview_core::{WebviewConfig, WebviewCore};
//!
//! let core = WebviewCore::new(WebviewConfig::default());
//! core.start()?;
//! // ... hand accepted sockets to `core.connect(..)` ...
//! if let Err(e) = core.update_view("<h1>Hello</h1>") {
//!     eprintln!("not shown yet: {e}");
//! }
//! core.stop()?;
//! # Ok::<(), webview_core::CoreError>(())
//! ```

mod bridge;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
mod hub;
pub mod memory;
pub mod pending;
pub mod playback;
pub mod protocol;
pub mod registry;
pub mod transport;
mod view;
mod webview;

pub use capture::{CaptureStats, FrameProcessor, RecordingState};
pub use channel::{ChannelKind, Direction, Frame};
pub use codec::{AudioEncoder, AudioFormat, CodecError, WavPassthrough};
pub use config::{BrowserSettings, CoreConfig, Orientation, WebviewConfig, WebviewSettings};
pub use error::CoreError;
pub use pending::Pending;
pub use playback::{AudioPayload, PlaybackStatus, PlaybackToken};
pub use registry::{Admission, Session, SessionId};
pub use transport::ChannelHandle;
pub use webview::WebviewCore;
