use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use webview_core::{WebviewConfig, WebviewCore};
use webview_server::config::{Overrides, load_config, log_directive};
use webview_server::page::counter_view;

#[derive(Parser)]
#[command(name = "webview")]
#[command(about = "Drive a browser page over WebSockets: HTML updates, audio playback, capture")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Browser executable to open the page with
    #[arg(long)]
    browser: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: WebviewConfig = load_config(args.config.as_deref())
        .extract()
        .context("invalid configuration")?;
    args.overrides.apply(&mut config.settings);
    let settings = config.settings.clone();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive(&settings)));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting {}", settings.title);

    let core = Arc::new(WebviewCore::new(config));
    core.start().context("failed to start core runtime")?;
    let runtime = core
        .runtime_handle()
        .context("core runtime stopped during startup")?;

    let listener = std::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .with_context(|| format!("failed to bind {}:{}", settings.host, settings.port))?;
    listener.set_nonblocking(true)?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_core = core.clone();
    runtime.spawn(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to adopt listener: {}", e);
                return;
            }
        };
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = webview_server::serve(server_core, listener, shutdown).await {
            error!("{:#}", e);
        }
    });

    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        let _ = stop_tx.send(());
    });

    if let Some(browser) = &args.browser {
        let mut command = Command::new(browser);
        command
            .args(settings.browser.launch_args())
            .arg(format!("--app={}", settings.url()));
        match command.spawn() {
            Ok(child) => info!("Launched {} (pid {})", browser.display(), child.id()),
            Err(e) => warn!("Could not launch {}: {}", browser.display(), e),
        }
    } else {
        info!("Open {} in a browser", settings.url());
    }

    let mut count: u64 = 0;
    loop {
        match stop_rx.recv_timeout(Duration::from_secs(1)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        count += 1;
        let html = counter_view(&settings.title, count).into_string();
        match core.update_view(html) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => debug!("View update skipped: {}", e),
            Err(e) => {
                error!("View update failed: {}", e);
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    core.stop().context("core shutdown failed")?;
    info!("Stopped");
    Ok(())
}
