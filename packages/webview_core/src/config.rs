use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transport::TransportConfig;

// =============================================================================
// Settings shared with the host (title, bind address, browser window)
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

/// How the host should launch the browser window (lives under `[browser]`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default)]
    pub kiosk_mode: bool,
    #[serde(default)]
    pub orientation: Orientation,
    /// Width and height in pixels
    #[serde(default)]
    pub window_size: Option<(u32, u32)>,
}

impl BrowserSettings {
    /// Chromium-style command line flags for this window.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-first-run",
            "--start-maximized",
            "--disable-infobars",
            "--no-default-browser-check",
            "--autoplay-policy=no-user-gesture-required",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if self.kiosk_mode {
            args.push("--kiosk".into());
        }
        // Forcing orientation is honoured by some platforms only.
        if self.orientation == Orientation::Portrait {
            args.push("--force-device-scale-factor=1".into());
            args.push("--force-device-orientation=portrait".into());
        }
        if let Some((width, height)) = self.window_size {
            args.push(format!("--window-size={width},{height}"));
        }
        args
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebviewSettings {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub browser: BrowserSettings,
}

impl Default for WebviewSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            host: default_host(),
            port: default_port(),
            debug: false,
            log_level: default_log_level(),
            browser: BrowserSettings::default(),
        }
    }
}

impl WebviewSettings {
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

// =============================================================================
// Core tunables (lives under `[core]`)
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Bound on a single socket write; `send_timeout_ms` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    /// Bound on frames waiting for the capture processor
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
    /// Playback tokens whose status is remembered
    #[serde(default = "default_playback_history")]
    pub playback_history: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            write_timeout_ms: None,
            outbound_capacity: default_outbound_capacity(),
            inbound_capacity: default_inbound_capacity(),
            frame_queue_capacity: default_frame_queue_capacity(),
            playback_history: default_playback_history(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl CoreConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout_ms
            .map_or_else(|| self.send_timeout(), Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            send_timeout: self.send_timeout(),
            write_timeout: self.write_timeout(),
            outbound_capacity: self.outbound_capacity.max(1),
            inbound_capacity: self.inbound_capacity.max(1),
        }
    }
}

/// Everything the core and its host read at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebviewConfig {
    #[serde(flatten)]
    pub settings: WebviewSettings,
    #[serde(default)]
    pub core: CoreConfig,
}

fn default_title() -> String {
    "Webview Server".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "warning".to_string()
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_outbound_capacity() -> usize {
    64
}
fn default_inbound_capacity() -> usize {
    256
}
fn default_frame_queue_capacity() -> usize {
    128
}
fn default_playback_history() -> usize {
    256
}
fn default_shutdown_timeout_ms() -> u64 {
    2000
}
