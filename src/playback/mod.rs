//! Recorded-segment playback: resolve a manifest URL, bind one player to a
//! video surface, and follow the player's events until the session detaches.

pub mod hls;
pub mod output;
pub mod session;
pub mod sink;
pub mod surface;

pub use session::{PlaybackController, PlaybackRequest, PlayerCommand};
pub use surface::VideoSurface;

use crate::model::StreamTarget;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Manifest and fragments are loaded by our HLS loader and fed to the surface
    Library,
    /// The surface is handed the manifest URL and plays it itself
    Native,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Library => write!(f, "library"),
            SinkKind::Native => write!(f, "native"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Manifest,
    Level,
    Fragment,
    Media,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Manifest => "manifestLoadError",
            ErrorCategory::Level => "levelLoadError",
            ErrorCategory::Fragment => "fragLoadError",
            ErrorCategory::Media => "mediaError",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{category}: {detail}")]
pub struct PlayerError {
    pub category: ErrorCategory,
    pub detail: String,
}

impl PlayerError {
    pub fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        PlayerError {
            category,
            detail: detail.into(),
        }
    }
}

/// Events a bound player reports back to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    ManifestParsed { levels: usize },
    MetadataLoaded,
    LevelLoaded { level: usize, fragments: usize },
    FragmentLoaded { sequence: u64, bytes: u64 },
    BufferFlushing,
    Ended,
    Error(PlayerError),
}

/// Why a session stopped short of playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not resolve a playable url: {0}")]
    ResolveFailed(String),
    #[error("the stream endpoint returned no url")]
    EmptyUrl,
    #[error("format not supported")]
    FormatNotSupported,
    #[error("video surface already has a player bound")]
    SurfaceBusy,
    #[error("player failed to attach: {0}")]
    Sink(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    ResolvingUrl,
    Attaching(SinkKind),
    Playing,
    Error(PlaybackError),
    Detached,
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Error(_) | PlaybackState::Detached)
    }
}

/// Snapshot published on every change of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub resolved_url: Option<String>,
    pub sink: Option<SinkKind>,
    /// The play request was refused; the session nominally plays but nothing moves
    pub start_rejected: bool,
    pub last_error: Option<PlayerError>,
    pub fragments_loaded: u64,
    pub ended: bool,
    /// Where play, pause and speed requests for this recording go
    pub controls: Option<StreamTarget>,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus {
            state: PlaybackState::Idle,
            resolved_url: None,
            sink: None,
            start_rejected: false,
            last_error: None,
            fragments_loaded: 0,
            ended: false,
            controls: None,
        }
    }
}
