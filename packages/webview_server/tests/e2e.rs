//! Real sockets against the router served on the core runtime.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use webview_core::protocol::PlaybackServerMessage;
use webview_core::{AudioPayload, ChannelKind, PlaybackStatus, WebviewConfig, WebviewCore};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    core: Arc<WebviewCore>,
    addr: std::net::SocketAddr,
}

impl Harness {
    async fn start() -> Self {
        let core = Arc::new(WebviewCore::new(WebviewConfig::default()));
        let starting = core.clone();
        tokio::task::spawn_blocking(move || starting.start())
            .await
            .unwrap()
            .unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let server_core = core.clone();
        core.runtime_handle().unwrap().spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let _ = webview_server::serve(server_core, listener, std::future::pending()).await;
        });

        Self { core, addr }
    }

    fn url(&self, kind: ChannelKind, session: &str) -> String {
        format!("ws://{}/{}?session={}", self.addr, kind.path(), session)
    }

    async fn wait_ready(&self, kind: ChannelKind) {
        tokio::time::timeout(TIMEOUT, async {
            while !self.core.is_ready(kind) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{kind} never became ready"));
    }

    async fn stop(self) {
        let core = self.core;
        tokio::task::spawn_blocking(move || core.stop())
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn view_update_reaches_browser_socket() {
    let harness = Harness::start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(harness.url(ChannelKind::View, "e2e"))
        .await
        .unwrap();
    harness.wait_ready(ChannelKind::View).await;

    harness
        .core
        .update_view_async("<h1>hello</h1>")
        .await
        .unwrap();

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.to_text().unwrap(), "<h1>hello</h1>");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn playback_ack_over_socket_completes_token() {
    let harness = Harness::start().await;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(harness.url(ChannelKind::Playback, "e2e"))
            .await
            .unwrap();
    harness.wait_ready(ChannelKind::Playback).await;

    let token = harness
        .core
        .play_audio_async(AudioPayload::from_wav_bytes(b"RIFF0000WAVE"))
        .await
        .unwrap();

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let PlaybackServerMessage::Audio { id, data } =
        serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(id, token);
    assert!(data.starts_with("data:audio/wav;base64,"));

    let ack = format!(r#"{{"type":"playback_complete","id":"{id}"}}"#);
    ws.send(Message::Text(ack.into())).await.unwrap();

    tokio::time::timeout(TIMEOUT, async {
        while harness.core.playback_status(token) != Some(PlaybackStatus::Completed) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("playback never completed");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_session_is_turned_away() {
    let harness = Harness::start().await;
    let (_first, _) = tokio_tungstenite::connect_async(harness.url(ChannelKind::View, "first"))
        .await
        .unwrap();
    harness.wait_ready(ChannelKind::View).await;

    let (mut second, _) =
        tokio_tungstenite::connect_async(harness.url(ChannelKind::View, "second"))
            .await
            .unwrap();
    let next = tokio::time::timeout(TIMEOUT, second.next())
        .await
        .expect("rejected socket was left open");
    assert!(
        matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_)))),
        "unexpected message {next:?}"
    );
    assert_eq!(harness.core.session().unwrap().id.as_str(), "first");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_socket_joins_session() {
    let harness = Harness::start().await;
    let (_ws, _) = tokio_tungstenite::connect_async(harness.url(ChannelKind::Capture, "e2e"))
        .await
        .unwrap();
    harness.wait_ready(ChannelKind::Capture).await;

    let session = harness.core.session().unwrap();
    assert_eq!(session.id.as_str(), "e2e");
    assert!(session.is_live(ChannelKind::Capture));
    assert!(!session.is_live(ChannelKind::View));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_channel_is_not_found() {
    let harness = Harness::start().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws-nope", harness.addr))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404)
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
    assert!(harness.core.session().is_none());

    harness.stop().await;
}
