//! Audio encoding seam.
//!
//! The core only ships WAV bytes to the browser as a base64 data URL. Turning
//! mp3/ogg/etc. into WAV is the job of an [`AudioEncoder`] supplied by the
//! host; [`WavPassthrough`] covers input that is already WAV.

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const WAV_DATA_URL_PREFIX: &str = "data:audio/wav;base64,";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
    Flac,
    Aac,
    M4a,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
            AudioFormat::M4a => "m4a",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        [
            AudioFormat::Mp3,
            AudioFormat::Wav,
            AudioFormat::Ogg,
            AudioFormat::Flac,
            AudioFormat::Aac,
            AudioFormat::M4a,
        ]
        .into_iter()
        .find(|format| format.extension() == ext)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported audio format: {}", .0.extension())]
    Unsupported(AudioFormat),

    #[error("unknown audio format for {0}")]
    UnknownFormat(String),

    #[error("input is not a RIFF/WAVE stream")]
    NotWav,

    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps encoded audio to a base64 WAV data URL.
pub trait AudioEncoder: Send + Sync {
    fn encode(&self, bytes: &[u8], format: AudioFormat) -> Result<String, CodecError>;
}

/// Accepts WAV input as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct WavPassthrough;

impl AudioEncoder for WavPassthrough {
    fn encode(&self, bytes: &[u8], format: AudioFormat) -> Result<String, CodecError> {
        if format != AudioFormat::Wav {
            return Err(CodecError::Unsupported(format));
        }
        if !is_wav(bytes) {
            return Err(CodecError::NotWav);
        }
        Ok(wav_data_url(bytes))
    }
}

pub fn wav_data_url(bytes: &[u8]) -> String {
    format!("{}{}", WAV_DATA_URL_PREFIX, BASE64.encode(bytes))
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Read an audio file and encode it, taking the format from its extension.
pub fn read_and_encode(encoder: &dyn AudioEncoder, path: &Path) -> Result<String, CodecError> {
    let format = AudioFormat::from_path(path)
        .ok_or_else(|| CodecError::UnknownFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    encoder.encode(&bytes, format)
}
