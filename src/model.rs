use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub type CameraId = u64;
pub type Timestamp = DateTime<Utc>;

/// Canonical wire form of a timestamp: RFC 3339, `Z` suffix, fractional
/// seconds only when present.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(s: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Owner {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StreamFormat {
    Mp4,
    Mjpeg,
    Hls,
    Other(String),
}

impl From<String> for StreamFormat {
    fn from(s: String) -> Self {
        match s.as_str() {
            "mp4" => StreamFormat::Mp4,
            "mjpeg" => StreamFormat::Mjpeg,
            "hls" => StreamFormat::Hls,
            _ => StreamFormat::Other(s),
        }
    }
}

impl From<StreamFormat> for String {
    fn from(f: StreamFormat) -> Self {
        match f {
            StreamFormat::Mp4 => "mp4".to_string(),
            StreamFormat::Mjpeg => "mjpeg".to_string(),
            StreamFormat::Hls => "hls".to_string(),
            StreamFormat::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    pub format: StreamFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub url: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub owner: Owner,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub live_snapshot: Option<String>,
    #[serde(default)]
    pub snapshot: Option<Snapshot>,
    #[serde(default)]
    pub has_recording: bool,
    #[serde(default)]
    pub has_notifications: bool,
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub low_latency_enabled: bool,
}

/// One page of `GET /api/cameras/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPage {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<Camera>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub status: String,
    pub retention: String,
    pub recording_start: Timestamp,
    pub recording_end: Timestamp,
    #[serde(default)]
    pub deactivated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSegment {
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
    pub segments: Vec<TimelineSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamControls {
    pub base_url: String,
    pub play: String,
    pub pause: String,
    pub speed: String,
}

/// The recording stream the API proxies play, pause and speed requests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub domain: String,
    pub stream_id: String,
}

impl StreamControls {
    /// `base_url` has the shape `https://<domain>/recording/streams/<id>/`.
    pub fn target(&self) -> Option<StreamTarget> {
        let url = Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?;
        let domain = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        segments.find(|s| *s == "streams")?;
        let stream_id = segments.next()?;
        Some(StreamTarget {
            domain,
            stream_id: stream_id.to_string(),
        })
    }
}

/// Body of the recording stream endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResolution {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub stream_info: Option<String>,
    #[serde(default)]
    pub stream_controls: Option<StreamControls>,
}
