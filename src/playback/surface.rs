use crate::config::PlayerConfig;
use crate::playback::output::{CommandOutput, MediaOutput};
use crate::playback::PlaybackError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct SurfaceInner {
    label: String,
    /// Fragment-fed rendering path, present when media-source playback works
    media_source: Option<Arc<dyn MediaOutput>>,
    /// Self-fetching rendering path and the manifest types it accepts
    native: Option<(Vec<String>, Arc<dyn MediaOutput>)>,
    bound: AtomicBool,
}

/// The one place a session renders into. At most one player may be bound to
/// a surface at a time; clones share the binding.
#[derive(Clone)]
pub struct VideoSurface {
    inner: Arc<SurfaceInner>,
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("label", &self.inner.label)
            .field("media_source", &self.inner.media_source.is_some())
            .field("native", &self.inner.native.as_ref().map(|(types, _)| types))
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl VideoSurface {
    pub fn new(
        label: impl Into<String>,
        media_source: Option<Arc<dyn MediaOutput>>,
        native: Option<(Vec<String>, Arc<dyn MediaOutput>)>,
    ) -> Self {
        VideoSurface {
            inner: Arc::new(SurfaceInner {
                label: label.into(),
                media_source,
                native,
                bound: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(cfg: &PlayerConfig) -> Self {
        let media_source = cfg
            .fragment_command
            .as_deref()
            .and_then(CommandOutput::from_argv)
            .map(|o| Arc::new(o) as Arc<dyn MediaOutput>);
        let native = cfg
            .native_command
            .as_deref()
            .and_then(CommandOutput::from_argv)
            .map(|o| (cfg.native_mime_types.clone(), Arc::new(o) as Arc<dyn MediaOutput>));
        Self::new("player", media_source, native)
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn supports_media_source(&self) -> bool {
        self.inner.media_source.is_some()
    }

    pub fn can_play_type(&self, mime: &str) -> bool {
        self.inner
            .native
            .as_ref()
            .map(|(types, _)| types.iter().any(|t| t.eq_ignore_ascii_case(mime)))
            .unwrap_or(false)
    }

    pub(crate) fn media_source_output(&self) -> Option<Arc<dyn MediaOutput>> {
        self.inner.media_source.clone()
    }

    pub(crate) fn native_output(&self) -> Option<Arc<dyn MediaOutput>> {
        self.inner.native.as_ref().map(|(_, o)| o.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound.load(Ordering::Acquire)
    }

    /// Claim the surface for one player. Fails if another binding is live.
    pub fn bind(&self) -> Result<SurfaceBinding, PlaybackError> {
        self.inner
            .bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PlaybackError::SurfaceBusy)?;
        tracing::debug!("surface `{}` bound", self.inner.label);
        Ok(SurfaceBinding {
            surface: self.clone(),
        })
    }
}

/// Releases the surface when dropped.
#[derive(Debug)]
pub struct SurfaceBinding {
    surface: VideoSurface,
}

impl Drop for SurfaceBinding {
    fn drop(&mut self) {
        self.surface.inner.bound.store(false, Ordering::Release);
        tracing::debug!("surface `{}` released", self.surface.inner.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HLS_MIME_TYPE;
    use crate::playback::output::tests::MemoryOutput;

    #[test]
    fn test_single_binding() {
        let surface = VideoSurface::new("t", None, None);
        let binding = surface.bind().unwrap();
        assert!(surface.is_bound());
        assert_eq!(surface.clone().bind().unwrap_err(), PlaybackError::SurfaceBusy);

        drop(binding);
        assert!(!surface.is_bound());
        assert!(surface.bind().is_ok());
    }

    #[test]
    fn test_capabilities() {
        let output: Arc<dyn MediaOutput> = Arc::new(MemoryOutput::default());
        let native_only = VideoSurface::new(
            "n",
            None,
            Some((vec![HLS_MIME_TYPE.to_string()], output.clone())),
        );
        assert!(!native_only.supports_media_source());
        assert!(native_only.can_play_type("Application/VND.Apple.MpegURL"));
        assert!(!native_only.can_play_type("video/mp4"));

        let bare = VideoSurface::new("b", None, None);
        assert!(!bare.can_play_type(HLS_MIME_TYPE));

        let cfg = PlayerConfig {
            fragment_command: Some(vec!["ffplay".into(), "-".into()]),
            ..PlayerConfig::default()
        };
        let from_cfg = VideoSurface::from_config(&cfg);
        assert!(from_cfg.supports_media_source());
        assert!(!from_cfg.can_play_type(HLS_MIME_TYPE));
    }
}
