pub mod camera;
pub mod cameras;
pub mod login;
pub mod timeline;

use crate::model::Timestamp;

/// Human-facing timestamp in the viewer's local zone.
pub fn display_local(ts: &Timestamp) -> String {
    ts.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
