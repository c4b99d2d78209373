use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl Default for MediaKind {
    fn default() -> Self {
        MediaKind::Audio
    }
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A single validated conversion job. Never persisted.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub url: String,
    pub kind: MediaKind,
    /// Target container/codec, e.g. "mp3" or "m4a" for audio.
    pub format: String,
    /// Audio bitrate ("192") or video height for video requests.
    pub quality: String,
    /// Parsed video height; `None` for audio.
    pub video_height: Option<u32>,
}

/// What a finished conversion left in the shared output directory.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub filename: String,
    pub size: u64,
    pub kind: MediaKind,
    /// Resolved quality label such as "720p"; video only.
    pub quality: Option<String>,
}
