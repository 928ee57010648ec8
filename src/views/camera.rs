use crate::api::{cancellable, ApiClient, ApiError};
use crate::model::{Camera, CameraId, RecordingInfo, StreamFormat};
use crate::views::timeline::TimelineView;
use tokio_util::sync::CancellationToken;

/// What the live area of the camera page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveView {
    Video { url: String, autoplay: bool, muted: bool },
    /// Continuously refreshing MJPEG image
    Image { url: String },
    Unsupported,
    NoStreams,
}

impl LiveView {
    /// With several streams the second one is shown, never the first.
    pub fn select(camera: &Camera) -> LiveView {
        match camera.streams.as_slice() {
            [_, second, ..] => match second.format {
                StreamFormat::Mp4 => LiveView::Video {
                    url: second.url.clone(),
                    autoplay: true,
                    muted: true,
                },
                _ => LiveView::Unsupported,
            },
            [only] => match only.format {
                StreamFormat::Mjpeg => LiveView::Image { url: only.url.clone() },
                _ => LiveView::Unsupported,
            },
            [] => LiveView::NoStreams,
        }
    }

    pub fn message(&self) -> Option<&'static str> {
        match self {
            LiveView::Unsupported => Some("Unsupported stream format"),
            LiveView::NoStreams => Some("No streams available"),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CameraDetail {
    pub camera: Camera,
    pub live: LiveView,
    /// "View live stream in new tab" target: always the first stream
    pub live_link: Option<String>,
    pub recording: Result<RecordingInfo, ApiError>,
    pub timeline: Option<Result<TimelineView, ApiError>>,
}

impl CameraDetail {
    pub fn new(camera: Camera, recording: Result<RecordingInfo, ApiError>) -> Self {
        let live = LiveView::select(&camera);
        let live_link = camera.streams.first().map(|s| s.url.clone());
        CameraDetail {
            camera,
            live,
            live_link,
            recording,
            timeline: None,
        }
    }

    /// Camera and recording info are fetched together; the timeline follows
    /// once the recording window is known. `cancel` aborts whatever is in
    /// flight when the view goes away.
    pub async fn load(api: &ApiClient, id: CameraId, cancel: &CancellationToken) -> Result<Self, ApiError> {
        let (camera, recording) = tokio::join!(
            cancellable(cancel, api.camera(id)),
            cancellable(cancel, api.recording_info(id)),
        );
        let camera = camera.map_err(|e| {
            tracing::error!("error fetching camera {}: {}", id, e);
            e
        })?;
        if let Err(e) = &recording {
            tracing::warn!("error fetching recording info for camera {}: {}", id, e);
        }

        let mut detail = CameraDetail::new(camera, recording);
        if let Ok(info) = &detail.recording {
            let timeline = cancellable(cancel, TimelineView::load(api, id, info)).await;
            match &timeline {
                Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                Err(e) => tracing::warn!("error fetching timeline for camera {}: {}", id, e),
                Ok(_) => {}
            }
            detail.timeline = Some(timeline);
        }
        Ok(detail)
    }
}
