//! Whole-core scenarios driven from plain threads, with in-memory sockets
//! standing in for the browser.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use webview_core::memory::{MemoryClient, memory_socket};
use webview_core::protocol::PlaybackServerMessage;
use webview_core::{
    AudioPayload, ChannelKind, CoreConfig, CoreError, Frame, PlaybackStatus, RecordingState,
    SessionId, WebviewConfig, WebviewCore,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn started_core() -> WebviewCore {
    let core = WebviewCore::new(WebviewConfig::default());
    core.start().unwrap();
    core
}

fn connect(core: &WebviewCore, kind: ChannelKind, session: &str) -> MemoryClient {
    let (client, sink, stream) = memory_socket();
    core.connect(kind, SessionId::from(session), sink, stream)
        .wait()
        .unwrap();
    client
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn expect_text(client: &mut MemoryClient) -> String {
    match client.recv_timeout(TIMEOUT) {
        Some(Frame::Text(text)) => text,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn expect_audio(client: &mut MemoryClient) -> (String, String) {
    let text = expect_text(client);
    match serde_json::from_str::<PlaybackServerMessage>(&text).unwrap() {
        PlaybackServerMessage::Audio { id, data } => (id.to_string(), data),
    }
}

#[test]
fn view_updates_arrive_in_submission_order() {
    let core = started_core();
    let mut view = connect(&core, ChannelKind::View, "a");

    let pending: Vec<_> = (0..50)
        .map(|i| core.update_view_async(format!("<p>{i}</p>")))
        .collect();
    for p in pending {
        p.wait().unwrap();
    }
    for i in 0..50 {
        assert_eq!(expect_text(&mut view), format!("<p>{i}</p>"));
    }
    core.stop().unwrap();
}

#[test]
fn delayed_playback_holds_playback_only() {
    let core = started_core();
    let mut view = connect(&core, ChannelKind::View, "a");
    let mut player = connect(&core, ChannelKind::Playback, "a");

    let delayed = AudioPayload::from_base64("AAAA")
        .unwrap()
        .with_delay(Duration::from_millis(600));
    let began = Instant::now();
    let first = core.play_audio_async(delayed);
    let second = core.play_audio_async(AudioPayload::from_base64("BBBB").unwrap());

    core.update_view("<p>not held back</p>").unwrap();
    assert!(began.elapsed() < Duration::from_millis(400));
    assert_eq!(expect_text(&mut view), "<p>not held back</p>");

    let first = first.wait().unwrap();
    assert!(began.elapsed() >= Duration::from_millis(600));
    let second = second.wait().unwrap();

    let (id, data) = expect_audio(&mut player);
    assert_eq!(id, first.to_string());
    assert_eq!(data, "data:audio/wav;base64,AAAA");
    let (id, _) = expect_audio(&mut player);
    assert_eq!(id, second.to_string());
    core.stop().unwrap();
}

#[test]
fn playback_acknowledgement_completes_token() {
    let core = started_core();
    let mut player = connect(&core, ChannelKind::Playback, "a");

    let token = core
        .play_audio(AudioPayload::from_wav_bytes(b"RIFF\0\0\0\0WAVE"))
        .unwrap();
    assert_eq!(core.playback_status(token), Some(PlaybackStatus::Sent));
    let (id, _) = expect_audio(&mut player);

    player.send_text(format!(r#"{{"type":"playback_complete","id":"{id}"}}"#));
    wait_until("playback completion", || {
        core.playback_status(token) == Some(PlaybackStatus::Completed)
    });
    core.stop().unwrap();
}

#[test]
fn playback_without_client_fails_fast() {
    let core = started_core();
    let payload = AudioPayload::from_base64("AAAA")
        .unwrap()
        .with_delay(Duration::from_secs(30));
    let began = Instant::now();
    assert_eq!(
        core.play_audio(payload),
        Err(CoreError::NotConnected(ChannelKind::Playback))
    );
    assert!(began.elapsed() < Duration::from_secs(1));
    core.stop().unwrap();
}

#[test]
fn capture_misuse_is_reported() {
    let core = started_core();
    assert_eq!(core.stop_recording(), Err(CoreError::NotRecording));
    assert_eq!(
        core.start_recording(|_: &[u8]| -> anyhow::Result<()> { Ok(()) }),
        Err(CoreError::NotConnected(ChannelKind::Capture))
    );

    let _mic = connect(&core, ChannelKind::Capture, "a");
    core.start_recording(|_: &[u8]| -> anyhow::Result<()> { Ok(()) })
        .unwrap();
    assert_eq!(
        core.start_recording(|_: &[u8]| -> anyhow::Result<()> { Ok(()) }),
        Err(CoreError::AlreadyRecording)
    );
    core.stop_recording().unwrap();
    assert_eq!(core.recording_state(), RecordingState::Idle);
    assert_eq!(core.stop_recording(), Err(CoreError::NotRecording));
    core.stop().unwrap();
}

#[test]
fn failing_processor_keeps_recording() {
    let core = started_core();
    let mut mic = connect(&core, ChannelKind::Capture, "a");

    core.start_recording(|_: &[u8]| -> anyhow::Result<()> { anyhow::bail!("cannot decode") })
        .unwrap();
    assert_eq!(expect_text(&mut mic), r#"{"command":"start_recording"}"#);

    for i in 0..3u8 {
        mic.send_binary(vec![i; 8]);
    }
    wait_until("three failed frames", || core.capture_stats().frames_failed == 3);
    assert_eq!(core.recording_state(), RecordingState::Recording);
    assert_eq!(core.capture_stats().frames_processed, 0);

    core.stop_recording().unwrap();
    assert_eq!(expect_text(&mut mic), r#"{"command":"stop_recording"}"#);
    assert_eq!(core.recording_state(), RecordingState::Idle);
    core.stop().unwrap();
}

#[test]
fn audio_sent_before_recording_is_discarded() {
    let core = started_core();
    let mut mic = connect(&core, ChannelKind::Capture, "a");
    mic.send_binary(vec![0xAA; 4]);
    std::thread::sleep(Duration::from_millis(50));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    core.start_recording(move |frame: &[u8]| -> anyhow::Result<()> {
        sink.lock().unwrap().push(frame.to_vec());
        Ok(())
    })
    .unwrap();
    assert_eq!(expect_text(&mut mic), r#"{"command":"start_recording"}"#);

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(core.recording_state(), RecordingState::Armed);
    assert_eq!(core.capture_stats().frames_received, 0);

    mic.send_binary(vec![1, 2, 3]);
    wait_until("new frame", || core.capture_stats().frames_processed == 1);
    core.stop_recording().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);
    core.stop().unwrap();
}

#[test]
fn idle_capture_disconnect_is_noticed() {
    let core = WebviewCore::new(WebviewConfig {
        core: CoreConfig {
            inbound_capacity: 4,
            ..CoreConfig::default()
        },
        ..WebviewConfig::default()
    });
    core.start().unwrap();
    let mic = connect(&core, ChannelKind::Capture, "a");

    for i in 0..10u8 {
        mic.send_binary(vec![i]);
    }
    mic.disconnect();
    wait_until("capture channel to drop", || {
        !core.is_ready(ChannelKind::Capture)
    });
    assert_eq!(
        core.start_recording(|_: &[u8]| -> anyhow::Result<()> { Ok(()) }),
        Err(CoreError::NotConnected(ChannelKind::Capture))
    );
    core.stop().unwrap();
}

#[test]
fn stalled_view_reports_send_timeout() {
    let core = WebviewCore::new(WebviewConfig {
        core: CoreConfig {
            send_timeout_ms: 100,
            write_timeout_ms: Some(30_000),
            outbound_capacity: 1,
            ..CoreConfig::default()
        },
        ..WebviewConfig::default()
    });
    core.start().unwrap();

    // A browser that never reads: the first frame sticks in the socket write.
    let sink = Box::pin(futures::sink::unfold((), |(), _frame: Frame| async {
        futures::future::pending::<Result<(), Infallible>>().await
    }));
    let stream = futures::stream::pending::<Result<Frame, Infallible>>();
    core.connect(ChannelKind::View, SessionId::from("a"), sink, stream)
        .wait()
        .unwrap();

    core.update_view("<p>0</p>").unwrap();
    core.update_view("<p>1</p>").unwrap();
    let began = Instant::now();
    let err = core.update_view("<p>2</p>").unwrap_err();
    assert_eq!(err, CoreError::SendTimeout(ChannelKind::View));
    assert!(err.is_recoverable());
    assert!(began.elapsed() >= Duration::from_millis(100));
    assert!(core.is_ready(ChannelKind::View));
    core.stop().unwrap();
}

#[test]
fn second_client_is_rejected_while_first_is_connected() {
    let core = started_core();
    let _view = connect(&core, ChannelKind::View, "a");

    let (_other, sink, stream) = memory_socket();
    let err = core
        .connect(ChannelKind::Playback, SessionId::from("b"), sink, stream)
        .wait()
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::ExistingSession {
            active: SessionId::from("a")
        }
    );
    assert_eq!(core.session().unwrap().id, SessionId::from("a"));
    assert!(!core.is_ready(ChannelKind::Playback));
    core.stop().unwrap();
}

#[test]
fn duplicate_channel_from_same_client_is_rejected() {
    let core = started_core();
    let _view = connect(&core, ChannelKind::View, "a");
    let (_dup, sink, stream) = memory_socket();
    let err = core
        .connect(ChannelKind::View, SessionId::from("a"), sink, stream)
        .wait()
        .unwrap_err();
    assert_eq!(err, CoreError::AlreadyOpen(ChannelKind::View));
    core.stop().unwrap();
}

#[test]
fn partial_disconnect_leaves_other_channels_working() {
    let core = started_core();
    let mut view = connect(&core, ChannelKind::View, "a");
    let mut player = connect(&core, ChannelKind::Playback, "a");
    let _mic = connect(&core, ChannelKind::Capture, "a");

    core.update_view("<h1>Hi</h1>").unwrap();
    assert_eq!(expect_text(&mut view), "<h1>Hi</h1>");

    view.disconnect();
    wait_until("view channel to drop", || !core.is_ready(ChannelKind::View));
    assert!(core.session().unwrap().degraded);

    assert_eq!(
        core.update_view("<h1>Bye</h1>"),
        Err(CoreError::NotConnected(ChannelKind::View))
    );
    core.play_audio(AudioPayload::from_base64("AAAA").unwrap())
        .unwrap();
    expect_audio(&mut player);
    assert!(core.is_ready(ChannelKind::Capture));

    // The same client reconnects its view and sees the latest content.
    let mut view = connect(&core, ChannelKind::View, "a");
    assert_eq!(expect_text(&mut view), "<h1>Bye</h1>");
    assert!(!core.session().unwrap().degraded);
    core.stop().unwrap();
}

#[test]
fn degraded_session_still_keeps_second_client_out() {
    let core = started_core();
    let view = connect(&core, ChannelKind::View, "a");
    let mut player = connect(&core, ChannelKind::Playback, "a");

    view.disconnect();
    wait_until("view channel to drop", || !core.is_ready(ChannelKind::View));

    let (_other, sink, stream) = memory_socket();
    let err = core
        .connect(ChannelKind::View, SessionId::from("b"), sink, stream)
        .wait()
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::ExistingSession {
            active: SessionId::from("a")
        }
    );
    assert_eq!(core.session().unwrap().id, SessionId::from("a"));

    // The first client's remaining channel is untouched.
    let token = core
        .play_audio(AudioPayload::from_base64("AAAA").unwrap())
        .unwrap();
    let (id, _) = expect_audio(&mut player);
    assert_eq!(id, token.to_string());
    core.stop().unwrap();
}

#[test]
fn reloaded_page_takes_over_once_old_page_is_gone() {
    let core = started_core();
    let old_view = connect(&core, ChannelKind::View, "old");
    let old_player = connect(&core, ChannelKind::Playback, "old");
    core.update_view("<p>current</p>").unwrap();

    old_view.disconnect();
    old_player.disconnect();
    wait_until("old page to drop", || {
        !core.is_ready(ChannelKind::View) && !core.is_ready(ChannelKind::Playback)
    });

    let mut new_view = connect(&core, ChannelKind::View, "new");
    let _new_player = connect(&core, ChannelKind::Playback, "new");
    assert_eq!(core.session().unwrap().id, SessionId::from("new"));
    assert!(core.is_ready(ChannelKind::Playback));
    assert_eq!(expect_text(&mut new_view), "<p>current</p>");
    core.stop().unwrap();
}

#[test]
fn stop_cancels_queued_work_promptly() {
    let core = WebviewCore::new(WebviewConfig {
        core: CoreConfig {
            shutdown_timeout_ms: 500,
            ..CoreConfig::default()
        },
        ..WebviewConfig::default()
    });
    core.start().unwrap();
    let _player = connect(&core, ChannelKind::Playback, "a");

    let pending: Vec<_> = (0..5)
        .map(|_| {
            let payload = AudioPayload::from_base64("AAAA")
                .unwrap()
                .with_delay(Duration::from_secs(30));
            core.play_audio_async(payload)
        })
        .collect();
    std::thread::sleep(Duration::from_millis(50));

    let began = Instant::now();
    core.stop().unwrap();
    assert!(began.elapsed() < Duration::from_secs(3));
    for p in pending {
        assert_eq!(p.wait(), Err(CoreError::Cancelled));
    }
    assert_eq!(
        core.update_view("<p/>"),
        Err(CoreError::RuntimeNotStarted)
    );
}
