use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three logical channels multiplexed over one client session.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// HTML replacement, server to browser
    View,
    /// Encoded audio for playback, server to browser
    Playback,
    /// Recorded audio frames, browser to server
    Capture,
}

/// Which way data frames flow on a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::View,
        ChannelKind::Playback,
        ChannelKind::Capture,
    ];

    pub fn direction(self) -> Direction {
        match self {
            ChannelKind::View | ChannelKind::Playback => Direction::Outbound,
            ChannelKind::Capture => Direction::Inbound,
        }
    }

    /// URL path segment the page shell connects to.
    pub fn path(self) -> &'static str {
        match self {
            ChannelKind::View => "ws-html-updater",
            ChannelKind::Playback => "ws-audio-player",
            ChannelKind::Capture => "ws-audio-recorder",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::View => "view",
            ChannelKind::Playback => "playback",
            ChannelKind::Capture => "capture",
        }
    }

    /// Whether inbound frames on this channel are queued for the core.
    ///
    /// VIEW is write-only; PLAYBACK carries acknowledgements back.
    pub(crate) fn keeps_inbound(self) -> bool {
        !matches!(self, ChannelKind::View)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel: {}", self.0)
    }
}

impl std::error::Error for UnknownChannel {}

impl FromStr for ChannelKind {
    type Err = UnknownChannel;

    /// Accepts either the short name (`view`) or the URL path (`ws-html-updater`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.path() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// One message on a channel socket. Each received message is one frame; there
/// is no reassembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame::Binary(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_name_and_path() {
        assert_eq!("view".parse::<ChannelKind>().unwrap(), ChannelKind::View);
        assert_eq!(
            "ws-audio-player".parse::<ChannelKind>().unwrap(),
            ChannelKind::Playback
        );
        assert_eq!(
            "ws-audio-recorder".parse::<ChannelKind>().unwrap(),
            ChannelKind::Capture
        );
        assert!("ws-nope".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn directions() {
        assert_eq!(ChannelKind::View.direction(), Direction::Outbound);
        assert_eq!(ChannelKind::Playback.direction(), Direction::Outbound);
        assert_eq!(ChannelKind::Capture.direction(), Direction::Inbound);
        assert!(!ChannelKind::View.keeps_inbound());
        assert!(ChannelKind::Capture.keeps_inbound());
    }
}
