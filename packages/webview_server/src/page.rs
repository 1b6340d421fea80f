use axum::extract::State;
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::sync::Arc;

use webview_core::{ChannelKind, WebviewCore, WebviewSettings};

const CSS: &str = r#"
html, body, #main_update_content {
    margin: 0;
    padding: 0;
    width: 100%;
    height: 100%;
    overflow: hidden;
}
"#;

/// Browser side of the three channels. `CHANNELS` is filled in per request.
const SHELL_JS: &str = r#"
const session = (crypto.randomUUID && crypto.randomUUID()) ||
    Date.now().toString(16) + Math.random().toString(16).slice(2);

function channelUrl(path) {
    const scheme = location.protocol === "https:" ? "wss" : "ws";
    return `${scheme}://${location.host}/${path}?session=${session}`;
}

function reloadLater() {
    setTimeout(() => location.reload(), 2000);
}

function openView(path) {
    const socket = new WebSocket(channelUrl(path));
    socket.onmessage = (event) => {
        document.getElementById("main_update_content").innerHTML = event.data;
    };
    socket.onclose = reloadLater;
}

function openPlayer(path) {
    const socket = new WebSocket(channelUrl(path));
    const queue = [];
    let playing = false;

    const playNext = () => {
        const clip = queue.shift();
        if (!clip) {
            playing = false;
            return;
        }
        playing = true;
        const audio = new Audio(clip.data);
        audio.onended = () => {
            socket.send(JSON.stringify({ type: "playback_complete", id: clip.id }));
            playNext();
        };
        audio.onerror = () => {
            socket.send(JSON.stringify({ type: "playback_error", id: clip.id, message: "decode failed" }));
            playNext();
        };
        audio.play().catch((err) => {
            socket.send(JSON.stringify({ type: "playback_error", id: clip.id, message: String(err) }));
            playNext();
        });
    };

    socket.onmessage = (event) => {
        const message = JSON.parse(event.data);
        if (message.type === "audio") {
            queue.push(message);
            if (!playing) playNext();
        }
    };
    socket.onclose = reloadLater;
}

function openRecorder(path) {
    const socket = new WebSocket(channelUrl(path));
    socket.binaryType = "arraybuffer";
    let recording = null;

    const start = async () => {
        if (recording) return;
        const stream = await navigator.mediaDevices.getUserMedia({ audio: true });
        const context = new (window.AudioContext || window.webkitAudioContext)();
        const source = context.createMediaStreamSource(stream);
        const processor = context.createScriptProcessor(8192, 1, 1);
        processor.onaudioprocess = (event) => {
            const samples = new Float32Array(event.inputBuffer.getChannelData(0));
            if (socket.readyState === WebSocket.OPEN) socket.send(samples.buffer);
        };
        source.connect(processor);
        processor.connect(context.destination);
        recording = { stream, context, source, processor };
    };

    const stop = () => {
        if (!recording) return;
        recording.processor.disconnect();
        recording.source.disconnect();
        recording.context.close();
        recording.stream.getTracks().forEach((track) => track.stop());
        recording = null;
    };

    socket.onmessage = (event) => {
        const message = JSON.parse(event.data);
        if (message.command === "start_recording") {
            start().catch((err) => console.error("recording failed", err));
        } else if (message.command === "stop_recording") {
            stop();
        }
    };
    socket.onclose = () => {
        stop();
        reloadLater();
    };
}

openView(CHANNELS.view);
openPlayer(CHANNELS.playback);
openRecorder(CHANNELS.capture);
"#;

pub async fn index_page(State(core): State<Arc<WebviewCore>>) -> Markup {
    render_page(&core.settings())
}

pub fn render_page(settings: &WebviewSettings) -> Markup {
    let channels = serde_json::json!({
        "view": ChannelKind::View.path(),
        "playback": ChannelKind::Playback.path(),
        "capture": ChannelKind::Capture.path(),
    });

    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (settings.title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                div id="main_update_content" {}
                script { (PreEscaped(format!("const CHANNELS = {channels};"))) (PreEscaped(SHELL_JS)) }
            }
        }
    }
}

/// Content the demo binary pushes once a second.
pub fn counter_view(title: &str, count: u64) -> Markup {
    html! {
        div style="display:flex;flex-direction:column;align-items:center;justify-content:center;height:100%;font-family:sans-serif" {
            h1 { (title) }
            p style="font-size:4rem;margin:0" { (count) }
        }
    }
}
