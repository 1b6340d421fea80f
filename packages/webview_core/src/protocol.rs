//! JSON envelopes exchanged with the page shell.
//!
//! VIEW carries raw HTML and has no envelope. PLAYBACK and CAPTURE use the
//! tagged messages below.

use serde::{Deserialize, Serialize};

use crate::playback::PlaybackToken;

/// Server → browser on the PLAYBACK channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackServerMessage {
    Audio { id: PlaybackToken, data: String },
}

/// Browser → server on the PLAYBACK channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackClientMessage {
    PlaybackComplete { id: PlaybackToken },
    PlaybackError {
        id: PlaybackToken,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Server → browser control commands on the CAPTURE channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CaptureCommand {
    StartRecording,
    StopRecording,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_command_shape() {
        let json = serde_json::to_string(&CaptureCommand::StartRecording).unwrap();
        assert_eq!(json, r#"{"command":"start_recording"}"#);
        let json = serde_json::to_string(&CaptureCommand::StopRecording).unwrap();
        assert_eq!(json, r#"{"command":"stop_recording"}"#);
    }

    #[test]
    fn audio_message_shape() {
        let id = PlaybackToken::new();
        let msg = PlaybackServerMessage::Audio {
            id,
            data: "data:audio/wav;base64,AAAA".into(),
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "audio");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["data"], "data:audio/wav;base64,AAAA");
    }

    #[test]
    fn parses_playback_complete() {
        let id = PlaybackToken::new();
        let raw = format!(r#"{{"type":"playback_complete","id":"{id}"}}"#);
        let msg: PlaybackClientMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg, PlaybackClientMessage::PlaybackComplete { id });
    }

    #[test]
    fn parses_playback_error_without_message() {
        let id = PlaybackToken::new();
        let raw = format!(r#"{{"type":"playback_error","id":"{id}"}}"#);
        let msg: PlaybackClientMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg, PlaybackClientMessage::PlaybackError { id, message: None });
    }
}
