use crate::api::{ApiClient, ApiError};
use crate::model::{CameraId, RecordingInfo, Timestamp, TimelineSegment};
use crate::router::Route;
use chrono::Duration;

pub const LOOKBACK_HOURS: i64 = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimelineWindow {
    pub fn ending_at(end: Timestamp) -> Self {
        TimelineWindow {
            start: end - Duration::hours(LOOKBACK_HOURS),
            end,
        }
    }

    pub fn for_recording(info: &RecordingInfo) -> Self {
        Self::ending_at(info.recording_end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCard {
    pub label: String,
    pub segment: TimelineSegment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineView {
    pub camera_id: CameraId,
    pub window: TimelineWindow,
    pub cards: Vec<SegmentCard>,
}

impl TimelineView {
    pub fn new(camera_id: CameraId, window: TimelineWindow, segments: Vec<TimelineSegment>) -> Self {
        let cards = segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| SegmentCard {
                label: format!("Segment {}", i + 1),
                segment,
            })
            .collect();
        TimelineView { camera_id, window, cards }
    }

    /// Segments are shown exactly as returned; no paging or filtering.
    pub async fn load(api: &ApiClient, camera_id: CameraId, info: &RecordingInfo) -> Result<Self, ApiError> {
        let window = TimelineWindow::for_recording(info);
        let timeline = api.timeline(camera_id, &window.start, &window.end).await?;
        tracing::debug!("camera {}: {} segments in window", camera_id, timeline.segments.len());
        Ok(Self::new(camera_id, window, timeline.segments))
    }

    pub fn select(&self, index: usize) -> Option<Route> {
        self.cards
            .get(index)
            .map(|card| Route::segment(self.camera_id, card.segment.start, card.segment.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;

    fn ts(s: &str) -> Timestamp {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_window_is_23_hours_back() {
        for end in ["2024-03-10T12:00:00Z", "2024-01-01T00:30:15.500Z", "2023-12-31T23:00:00Z"] {
            let end = ts(end);
            let window = TimelineWindow::ending_at(end);
            assert_eq!(window.end, end);
            assert_eq!(window.end - window.start, Duration::hours(23));
        }
        let window = TimelineWindow::ending_at(ts("2024-01-02T00:00:00Z"));
        assert_eq!(window.start, ts("2024-01-01T01:00:00Z"));
    }

    #[test]
    fn test_segment_selection_route() {
        let segment = TimelineSegment {
            start: ts("2024-01-01T00:00:00Z"),
            end: ts("2024-01-01T00:10:00Z"),
        };
        let view = TimelineView::new(4, TimelineWindow::ending_at(segment.end), vec![segment]);

        assert_eq!(view.cards[0].label, "Segment 1");
        let route = view.select(0).unwrap();
        assert_eq!(
            route.to_string(),
            "/segment/4?start=2024-01-01T00%3A00%3A00Z&end=2024-01-01T00%3A10%3A00Z"
        );
        match Route::parse(&route.to_string()).unwrap() {
            Route::Segment { id, start, end } => {
                assert_eq!(id, 4);
                assert_eq!(start, Some(segment.start));
                assert_eq!(end, Some(segment.end));
            }
            other => panic!("unexpected route {other:?}"),
        }
        assert!(view.select(1).is_none());
    }
}
