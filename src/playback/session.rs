use crate::api::{cancellable, ApiClient, ApiError};
use crate::config::PlayerConfig;
use crate::model::{CameraId, Timestamp};
use crate::playback::sink::{probe_sink, PlayableSink};
use crate::playback::surface::VideoSurface;
use crate::playback::{PlaybackError, PlaybackState, PlaybackStatus, PlayerEvent, SinkKind};
use crate::router::Route;
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The parameters one session plays. A change of any of them means a new
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub camera_id: CameraId,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl PlaybackRequest {
    /// Only a segment route with both bounds present is playable.
    pub fn from_route(route: &Route) -> Option<Self> {
        match route {
            Route::Segment {
                id,
                start: Some(start),
                end: Some(end),
            } => Some(PlaybackRequest {
                camera_id: *id,
                start: *start,
                end: *end,
            }),
            _ => None,
        }
    }
}

/// Handle to one running playback. Dropping it cancels the session; use
/// [`PlaybackSession::detach`] to also wait for the teardown.
#[derive(Debug)]
pub struct PlaybackSession {
    request: PlaybackRequest,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    status: watch::Receiver<PlaybackStatus>,
}

impl PlaybackSession {
    pub fn start(
        api: ApiClient,
        request: PlaybackRequest,
        surface: VideoSurface,
        http: Client,
        debug: bool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(PlaybackStatus::default());
        let task = SessionTask {
            api,
            request,
            surface,
            http,
            debug,
            cancel: cancel.clone(),
            status: tx,
        };
        let handle = tokio::spawn(task.run());
        PlaybackSession {
            request,
            cancel,
            handle: Some(handle),
            status: rx,
        }
    }

    pub fn request(&self) -> &PlaybackRequest {
        &self.request
    }

    pub fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    pub fn current(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    /// Cancel the session and wait until its player is destroyed and the
    /// surface released. Returns the final status.
    pub async fn detach(mut self) -> PlaybackStatus {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("playback task failed: {}", e);
            }
        }
        self.current()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionTask {
    api: ApiClient,
    request: PlaybackRequest,
    surface: VideoSurface,
    http: Client,
    debug: bool,
    cancel: CancellationToken,
    status: watch::Sender<PlaybackStatus>,
}

impl SessionTask {
    fn set_state(&self, state: PlaybackState) {
        tracing::debug!("camera {} playback -> {:?}", self.request.camera_id, state);
        self.status.send_modify(|s| s.state = state);
    }

    async fn run(self) {
        let PlaybackRequest { camera_id, start, end } = self.request;
        self.set_state(PlaybackState::ResolvingUrl);

        let resolved = cancellable(&self.cancel, self.api.resolve_stream(camera_id, &start, &end)).await;
        let stream = match resolved {
            Ok(stream) => stream,
            Err(ApiError::Cancelled) => {
                tracing::debug!("camera {} detached while resolving", camera_id);
                return self.set_state(PlaybackState::Detached);
            }
            Err(ApiError::MissingField(_)) => {
                tracing::error!("no stream url returned for camera {}", camera_id);
                return self.set_state(PlaybackState::Error(PlaybackError::EmptyUrl));
            }
            Err(e) => {
                tracing::error!("error fetching stream url for camera {}: {}", camera_id, e);
                return self.set_state(PlaybackState::Error(PlaybackError::ResolveFailed(e.to_string())));
            }
        };
        let url = stream.url;
        self.status.send_modify(|s| {
            s.resolved_url = Some(url.clone());
            s.controls = stream.controls;
        });

        let Some(mut sink) = probe_sink(&self.surface, &self.http, self.debug) else {
            tracing::error!("surface `{}` cannot play {}", self.surface.label(), url);
            return self.set_state(PlaybackState::Error(PlaybackError::FormatNotSupported));
        };
        let binding = match self.surface.bind() {
            Ok(b) => b,
            Err(e) => return self.set_state(PlaybackState::Error(e)),
        };

        let kind = sink.kind();
        self.status.send_modify(|s| s.sink = Some(kind));
        self.set_state(PlaybackState::Attaching(kind));

        let (events_tx, events) = mpsc::unbounded_channel();
        if let Err(e) = sink.attach(&url, events_tx).await {
            tracing::error!("failed to attach {} player: {}", kind, e);
            sink.destroy().await;
            drop(binding);
            return self.set_state(PlaybackState::Error(e));
        }
        tracing::info!("camera {} attached {} player to {}", camera_id, kind, url);

        self.follow(&mut *sink, events).await;

        // the player goes first, then the surface
        sink.destroy().await;
        drop(binding);
        self.set_state(PlaybackState::Detached);
    }

    /// Apply player events to the status until the session is cancelled.
    async fn follow(&self, sink: &mut dyn PlayableSink, mut events: mpsc::UnboundedReceiver<PlayerEvent>) {
        let mut open = true;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                ev = events.recv(), if open => ev,
            };
            let Some(event) = event else {
                open = false;
                continue;
            };

            match event {
                PlayerEvent::ManifestParsed { levels } if sink.kind() == SinkKind::Library => {
                    tracing::debug!("manifest parsed with {} level(s)", levels);
                    self.start_playing(sink).await;
                }
                PlayerEvent::MetadataLoaded if sink.kind() == SinkKind::Native => {
                    self.start_playing(sink).await;
                }
                PlayerEvent::ManifestParsed { .. } | PlayerEvent::MetadataLoaded => {}
                PlayerEvent::LevelLoaded { level, fragments } => {
                    if self.debug {
                        tracing::debug!("level {} loaded with {} fragment(s)", level, fragments);
                    }
                }
                PlayerEvent::FragmentLoaded { sequence, bytes } => {
                    if self.debug {
                        tracing::debug!("fragment {} loaded ({} bytes)", sequence, bytes);
                    }
                    self.status.send_modify(|s| s.fragments_loaded += 1);
                }
                PlayerEvent::BufferFlushing => tracing::debug!("buffer flushing"),
                PlayerEvent::Ended => {
                    tracing::info!("camera {} segment ended", self.request.camera_id);
                    self.status.send_modify(|s| s.ended = true);
                }
                PlayerEvent::Error(e) => {
                    tracing::error!("HLS error ({}): {}", e.category, e.detail);
                    self.status.send_modify(|s| s.last_error = Some(e));
                }
            }
        }
    }

    async fn start_playing(&self, sink: &mut dyn PlayableSink) {
        let playing = self.status.borrow().state == PlaybackState::Playing;
        if playing {
            return;
        }
        self.set_state(PlaybackState::Playing);
        if let Err(e) = sink.play().await {
            tracing::error!("error attempting to play: {}", e);
            self.status.send_modify(|s| s.start_rejected = true);
        }
    }
}

/// Owns the surface and keeps at most one session on it. Opening new
/// parameters fully detaches the previous session first.
pub struct PlaybackController {
    api: ApiClient,
    surface: VideoSurface,
    http: Client,
    debug: bool,
    current: Option<PlaybackSession>,
}

impl PlaybackController {
    pub fn new(api: ApiClient, surface: VideoSurface, player: &PlayerConfig) -> Self {
        PlaybackController {
            api,
            surface,
            http: Client::new(),
            debug: player.debug,
            current: None,
        }
    }

    #[cfg(test)]
    pub fn surface(&self) -> &VideoSurface {
        &self.surface
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.current.as_ref()
    }

    pub async fn open(&mut self, request: PlaybackRequest) -> watch::Receiver<PlaybackStatus> {
        if let Some(session) = &self.current {
            if session.request == request {
                return session.status();
            }
        }
        self.close().await;
        let session = PlaybackSession::start(
            self.api.clone(),
            request,
            self.surface.clone(),
            self.http.clone(),
            self.debug,
        );
        let status = session.status();
        self.current = Some(session);
        status
    }

    /// A route without a complete range leaves nothing playing.
    pub async fn open_route(&mut self, route: &Route) -> Option<watch::Receiver<PlaybackStatus>> {
        match PlaybackRequest::from_route(route) {
            Some(request) => Some(self.open(request).await),
            None => {
                self.close().await;
                None
            }
        }
    }

    pub async fn close(&mut self) -> Option<PlaybackStatus> {
        let session = self.current.take()?;
        Some(session.detach().await)
    }

    /// Apply `commands` one at a time until every sender is gone, then close.
    /// `opened` receives the status of each opened route.
    pub async fn serve<F>(mut self, mut commands: mpsc::UnboundedReceiver<PlayerCommand>, mut opened: F)
    where
        F: FnMut(&Route, Option<watch::Receiver<PlaybackStatus>>) + Send,
    {
        while let Some(command) = commands.recv().await {
            match command {
                PlayerCommand::Open(route) => {
                    let status = self.open_route(&route).await;
                    opened(&route, status);
                }
                PlayerCommand::Close => {
                    self.close().await;
                }
            }
        }
        self.close().await;
    }
}

/// A request to the task that owns a [`PlaybackController`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Open(Route),
    Close,
}
