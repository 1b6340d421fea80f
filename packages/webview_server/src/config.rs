use std::path::Path;

use webview_core::{WebviewConfig, WebviewSettings};

// =============================================================================
// Layered config (defaults / webview.toml / env vars / CLI flags)
// =============================================================================
//
//   webview.toml:    port = 9000
//                    [browser]
//                    kiosk_mode = true
//
//   env var:         WEBVIEW_BROWSER__KIOSK_MODE=true   (double underscore = nesting)
//                    WEBVIEW_CORE__SEND_TIMEOUT_MS=2000

/// Build the figment for `path` (if any) layered over defaults and env.
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(WebviewConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("WEBVIEW_").split("__"))
}

/// Command line overrides; anything given here beats the loaded config.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct Overrides {
    /// Host to bind to
    #[arg(short = 'b', long)]
    pub host: Option<String>,

    /// Port for the web server
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Page title
    #[arg(long)]
    pub title: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Launch the browser in kiosk mode
    #[arg(long)]
    pub kiosk: bool,
}

impl Overrides {
    pub fn apply(&self, settings: &mut WebviewSettings) {
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(title) = &self.title {
            settings.title = title.clone();
        }
        if self.debug {
            settings.debug = true;
        }
        if self.kiosk {
            settings.browser.kiosk_mode = true;
        }
    }
}

/// Default tracing directive when `RUST_LOG` is not set.
pub fn log_directive(settings: &WebviewSettings) -> String {
    if settings.debug {
        return "webview=debug,webview_core=debug,webview_server=debug,tower_http=debug,info"
            .to_string();
    }
    let level = match settings.log_level.to_ascii_lowercase().as_str() {
        "warning" | "warn" => "warn",
        "critical" | "error" => "error",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "warn",
    };
    level.to_string()
}
