use crate::config::HLS_MIME_TYPE;
use crate::playback::hls::{HlsLoader, LoadedManifest};
use crate::playback::output::{MediaOutput, OutputPipe};
use crate::playback::surface::VideoSurface;
use crate::playback::{ErrorCategory, PlaybackError, PlayerError, PlayerEvent, SinkKind};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type EventSender = mpsc::UnboundedSender<PlayerEvent>;

/// A play request the output refused to honour.
#[derive(Debug, thiserror::Error)]
#[error("play request rejected: {0}")]
pub struct PlayRejected(#[from] pub std::io::Error);

/// One way of getting a manifest URL onto a video surface. A session picks
/// exactly one implementation up front and keeps it until detach.
#[async_trait]
pub trait PlayableSink: Send {
    fn kind(&self) -> SinkKind;

    /// Start loading `url`; progress and failures arrive on `events`.
    async fn attach(&mut self, url: &str, events: EventSender) -> Result<(), PlaybackError>;

    async fn play(&mut self) -> Result<(), PlayRejected>;

    /// Release everything the sink holds. Must be called before the surface
    /// is handed to another sink.
    async fn destroy(&mut self);
}

/// Capability probe: the media-source path when the surface supports it,
/// else direct playback when the surface accepts HLS manifests.
pub fn probe_sink(surface: &VideoSurface, http: &Client, debug: bool) -> Option<Box<dyn PlayableSink>> {
    if surface.supports_media_source() {
        let output = surface.media_source_output()?;
        return Some(Box::new(LibrarySink::new(HlsLoader::new(http.clone(), debug), output)));
    }
    if surface.can_play_type(HLS_MIME_TYPE) {
        let output = surface.native_output()?;
        return Some(Box::new(NativeSink::new(http.clone(), output)));
    }
    None
}

fn emit(events: &EventSender, event: PlayerEvent) {
    // a closed channel only means the session stopped listening
    let _ = events.send(event);
}

/// Loads the manifest itself and feeds fragments to the surface output.
pub struct LibrarySink {
    loader: HlsLoader,
    output: Arc<dyn MediaOutput>,
    start: Option<oneshot::Sender<OutputPipe>>,
    events: Option<EventSender>,
    task: Option<JoinHandle<()>>,
}

impl LibrarySink {
    pub fn new(loader: HlsLoader, output: Arc<dyn MediaOutput>) -> Self {
        LibrarySink {
            loader,
            output,
            start: None,
            events: None,
            task: None,
        }
    }
}

async fn feed_fragments(
    loader: HlsLoader,
    manifest: LoadedManifest,
    mut pipe: OutputPipe,
    events: EventSender,
) {
    let mut playlist = manifest.playlist;
    let mut next_sequence = playlist.media_sequence;

    'feed: loop {
        let from = next_sequence;
        for fragment in playlist.fragments.iter().filter(|f| f.sequence >= from) {
            match loader.fetch_fragment(fragment, &mut pipe).await {
                Ok(bytes) => emit(
                    &events,
                    PlayerEvent::FragmentLoaded {
                        sequence: fragment.sequence,
                        bytes,
                    },
                ),
                // the renderer is gone, nothing more can be shown
                Err(e) if e.category == ErrorCategory::Media => {
                    emit(&events, PlayerEvent::Error(e));
                    break 'feed;
                }
                // a bad fragment is skipped, not fatal
                Err(e) => emit(&events, PlayerEvent::Error(e)),
            }
            next_sequence = fragment.sequence + 1;
        }

        if playlist.ended {
            break;
        }
        tokio::time::sleep(Duration::from_secs(playlist.target_duration.max(1))).await;
        match loader.load_level(&manifest.level_url).await {
            Ok(refreshed) => {
                emit(
                    &events,
                    PlayerEvent::LevelLoaded {
                        level: manifest.level,
                        fragments: refreshed.fragments.len(),
                    },
                );
                playlist = refreshed;
            }
            Err(e) => emit(&events, PlayerEvent::Error(e)),
        }
    }

    emit(&events, PlayerEvent::BufferFlushing);
    if let Err(e) = pipe.finish().await {
        tracing::warn!("renderer did not close cleanly: {}", e);
    }
    emit(&events, PlayerEvent::Ended);
}

#[async_trait]
impl PlayableSink for LibrarySink {
    fn kind(&self) -> SinkKind {
        SinkKind::Library
    }

    async fn attach(&mut self, url: &str, events: EventSender) -> Result<(), PlaybackError> {
        if self.task.is_some() {
            return Err(PlaybackError::Sink("library sink already attached".into()));
        }
        let (start_tx, start_rx) = oneshot::channel::<OutputPipe>();
        let loader = self.loader.clone();
        let url = url.to_string();

        self.start = Some(start_tx);
        self.events = Some(events.clone());
        self.task = Some(tokio::spawn(async move {
            let manifest = match loader.load(&url).await {
                Ok(m) => m,
                Err(e) => {
                    emit(&events, PlayerEvent::Error(e));
                    return;
                }
            };
            emit(&events, PlayerEvent::ManifestParsed { levels: manifest.levels });
            emit(
                &events,
                PlayerEvent::LevelLoaded {
                    level: manifest.level,
                    fragments: manifest.playlist.fragments.len(),
                },
            );

            // fragments flow only once the output has been started
            let Ok(pipe) = start_rx.await else {
                return;
            };
            feed_fragments(loader, manifest, pipe, events).await;
        }));
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlayRejected> {
        let Some(start) = self.start.take() else {
            tracing::debug!("library sink already playing");
            return Ok(());
        };
        let pipe = self.output.open(None)?;
        if start.send(pipe).is_err() {
            tracing::debug!("loader finished before playback started");
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        self.start = None;
        if let Some(task) = self.task.take() {
            task.abort();
            // the pipe, and any renderer it owns, is dropped with the task
            let _ = task.await;
        }
        if let Some(events) = self.events.take() {
            emit(&events, PlayerEvent::BufferFlushing);
        }
    }
}

/// Hands the manifest URL straight to a renderer that plays HLS itself.
pub struct NativeSink {
    http: Client,
    output: Arc<dyn MediaOutput>,
    source: Option<String>,
    events: Option<EventSender>,
    tasks: Vec<JoinHandle<()>>,
}

impl NativeSink {
    pub fn new(http: Client, output: Arc<dyn MediaOutput>) -> Self {
        NativeSink {
            http,
            output,
            source: None,
            events: None,
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl PlayableSink for NativeSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Native
    }

    async fn attach(&mut self, url: &str, events: EventSender) -> Result<(), PlaybackError> {
        if self.source.is_some() {
            return Err(PlaybackError::Sink("native sink already has a source".into()));
        }
        self.source = Some(url.to_string());
        self.events = Some(events.clone());

        // metadata is "loaded" once the manifest is reachable and looks like HLS
        let http = self.http.clone();
        let url = url.to_string();
        self.tasks.push(tokio::spawn(async move {
            let result = async {
                let text = http.get(&url).send().await?.error_for_status()?.text().await?;
                Ok::<_, reqwest::Error>(text)
            }
            .await;
            match result {
                Ok(text) if text.trim_start().starts_with("#EXTM3U") => emit(&events, PlayerEvent::MetadataLoaded),
                Ok(_) => emit(
                    &events,
                    PlayerEvent::Error(PlayerError::new(ErrorCategory::Manifest, "not an HLS manifest")),
                ),
                Err(e) => emit(
                    &events,
                    PlayerEvent::Error(PlayerError::new(ErrorCategory::Manifest, e.to_string())),
                ),
            }
        }));
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlayRejected> {
        let Some(source) = self.source.as_deref() else {
            return Ok(());
        };
        let mut pipe = self.output.open(Some(source))?;
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = pipe.finish().await {
                tracing::warn!("native renderer failed: {}", e);
            }
            if let Some(events) = events {
                emit(&events, PlayerEvent::Ended);
            }
        }));
        Ok(())
    }

    async fn destroy(&mut self) {
        self.source = None;
        self.events = None;
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::tests::MemoryOutput;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> PlayerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for player event")
            .expect("event channel closed")
    }

    #[test]
    fn test_probe_prefers_media_source() {
        let http = Client::new();
        let output: Arc<dyn MediaOutput> = Arc::new(MemoryOutput::default());
        let hls = vec![HLS_MIME_TYPE.to_string()];

        let both = VideoSurface::new("b", Some(output.clone()), Some((hls.clone(), output.clone())));
        assert_eq!(probe_sink(&both, &http, false).unwrap().kind(), SinkKind::Library);

        let native = VideoSurface::new("n", None, Some((hls, output.clone())));
        assert_eq!(probe_sink(&native, &http, false).unwrap().kind(), SinkKind::Native);

        let mp4_only = VideoSurface::new("m", None, Some((vec!["video/mp4".into()], output)));
        assert!(probe_sink(&mp4_only, &http, false).is_none());
    }

    #[tokio::test]
    async fn test_library_sink_waits_for_play() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAAA".to_vec()))
            .mount(&server)
            .await;

        let output = MemoryOutput::default();
        let mut sink = LibrarySink::new(HlsLoader::new(Client::new(), false), Arc::new(output.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach(&format!("{}/index.m3u8", server.uri()), tx).await.unwrap();

        assert_eq!(next_event(&mut rx).await, PlayerEvent::ManifestParsed { levels: 1 });
        assert_eq!(next_event(&mut rx).await, PlayerEvent::LevelLoaded { level: 0, fragments: 1 });
        assert!(output.bytes().is_empty());
        assert!(output.open_calls().is_empty());

        sink.play().await.unwrap();
        assert_eq!(next_event(&mut rx).await, PlayerEvent::FragmentLoaded { sequence: 0, bytes: 4 });
        assert_eq!(next_event(&mut rx).await, PlayerEvent::BufferFlushing);
        assert_eq!(next_event(&mut rx).await, PlayerEvent::Ended);
        assert_eq!(output.bytes(), b"AAAA");
        assert_eq!(output.open_calls(), vec![None]);

        sink.destroy().await;
    }

    #[tokio::test]
    async fn test_live_playlist_is_polled_for_new_fragments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\na.ts\n",
            ))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\na.ts\n#EXTINF:1,\nb.ts\n#EXT-X-ENDLIST\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAAA".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BB".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let output = MemoryOutput::default();
        let mut sink = LibrarySink::new(HlsLoader::new(Client::new(), false), Arc::new(output.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach(&format!("{}/live.m3u8", server.uri()), tx).await.unwrap();
        sink.play().await.unwrap();

        let mut events = Vec::new();
        loop {
            let event = next_event(&mut rx).await;
            let done = event == PlayerEvent::Ended;
            events.push(event);
            if done {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                PlayerEvent::ManifestParsed { levels: 1 },
                PlayerEvent::LevelLoaded { level: 0, fragments: 1 },
                PlayerEvent::FragmentLoaded { sequence: 0, bytes: 4 },
                PlayerEvent::LevelLoaded { level: 0, fragments: 2 },
                PlayerEvent::FragmentLoaded { sequence: 1, bytes: 2 },
                PlayerEvent::BufferFlushing,
                PlayerEvent::Ended,
            ]
        );
        assert_eq!(output.bytes(), b"AAAABB");

        sink.destroy().await;
    }

    #[tokio::test]
    async fn test_broken_output_still_ends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2,\na.ts\n#EXTINF:2,\nb.ts\n#EXT-X-ENDLIST\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAAA".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BB".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let mut sink = LibrarySink::new(HlsLoader::new(Client::new(), false), Arc::new(MemoryOutput::broken()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach(&format!("{}/index.m3u8", server.uri()), tx).await.unwrap();
        sink.play().await.unwrap();

        assert_eq!(next_event(&mut rx).await, PlayerEvent::ManifestParsed { levels: 1 });
        assert_eq!(next_event(&mut rx).await, PlayerEvent::LevelLoaded { level: 0, fragments: 2 });
        match next_event(&mut rx).await {
            PlayerEvent::Error(e) => assert_eq!(e.category, ErrorCategory::Media),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(next_event(&mut rx).await, PlayerEvent::BufferFlushing);
        assert_eq!(next_event(&mut rx).await, PlayerEvent::Ended);

        sink.destroy().await;
    }

    #[tokio::test]
    async fn test_library_sink_reports_manifest_error() {
        let server = MockServer::start().await;
        let mut sink = LibrarySink::new(
            HlsLoader::new(Client::new(), false),
            Arc::new(MemoryOutput::default()),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach(&format!("{}/missing.m3u8", server.uri()), tx).await.unwrap();

        match next_event(&mut rx).await {
            PlayerEvent::Error(e) => assert_eq!(e.category, ErrorCategory::Manifest),
            other => panic!("unexpected event {other:?}"),
        }
        sink.destroy().await;
    }

    #[tokio::test]
    async fn test_native_sink_hands_url_to_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let output = MemoryOutput::default();
        let mut sink = NativeSink::new(Client::new(), Arc::new(output.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = format!("{}/index.m3u8", server.uri());
        sink.attach(&url, tx).await.unwrap();

        assert_eq!(next_event(&mut rx).await, PlayerEvent::MetadataLoaded);
        sink.play().await.unwrap();
        assert_eq!(output.open_calls(), vec![Some(url)]);
        assert_eq!(next_event(&mut rx).await, PlayerEvent::Ended);

        sink.destroy().await;
    }

    #[tokio::test]
    async fn test_refused_output_rejects_play() {
        let mut sink = NativeSink::new(Client::new(), Arc::new(MemoryOutput::refusing()));
        let (tx, _rx) = mpsc::unbounded_channel();
        sink.attach("http://127.0.0.1:1/index.m3u8", tx).await.unwrap();

        assert!(sink.play().await.is_err());
        sink.destroy().await;
    }
}
