//! HTTP host for `webview_core`.
//!
//! Serves the page shell at `/`, upgrades `/{channel}?session=<id>` to a
//! WebSocket bound to that channel, and reports the session at `/status`.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt, future};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use webview_core::{
    CaptureStats, ChannelKind, Frame, RecordingState, Session, SessionId, WebviewCore,
};

pub mod config;
pub mod page;

/// Adds a unique request id to each request span.
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %Uuid::new_v4(),
        )
    }
}

pub fn create_router(core: Arc<WebviewCore>) -> Router {
    Router::new()
        .route("/", get(page::index_page))
        .route("/status", get(status))
        .route("/{channel}", get(channel_socket))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(core)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    core: Arc<WebviewCore>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, create_router(core))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    session: Option<String>,
}

async fn channel_socket(
    State(core): State<Arc<WebviewCore>>,
    Path(channel): Path<String>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(kind) = channel.parse::<ChannelKind>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let session_id = params
        .session
        .filter(|s| !s.is_empty())
        .map(SessionId::from)
        .unwrap_or_else(SessionId::generate);

    ws.on_upgrade(move |socket| attach_socket(core, kind, session_id, socket))
}

async fn attach_socket(
    core: Arc<WebviewCore>,
    kind: ChannelKind,
    session_id: SessionId,
    socket: WebSocket,
) {
    let (sender, receiver) = socket.split();

    let sink = Box::pin(sender.with(|frame: Frame| {
        future::ready(Ok::<_, axum::Error>(match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }))
    }));

    let stream = Box::pin(
        receiver
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                    Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            }),
    );

    match core.connect(kind, session_id.clone(), sink, stream).await {
        Ok(handle) => debug!(
            "{} socket attached for session {} (generation {})",
            kind,
            session_id,
            handle.generation()
        ),
        Err(e) => warn!(
            "Refused {} socket for session {}: {}",
            kind, session_id, e
        ),
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    running: bool,
    session: Option<Session>,
    recording: RecordingState,
    capture: CaptureStats,
}

async fn status(State(core): State<Arc<WebviewCore>>) -> Json<StatusView> {
    Json(StatusView {
        running: core.is_running(),
        session: core.session(),
        recording: core.recording_state(),
        capture: core.capture_stats(),
    })
}
