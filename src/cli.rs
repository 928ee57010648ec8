use crate::api::{ApiClient, RecordingControl};
use crate::config::AppConfig;
use crate::model::{format_timestamp, parse_timestamp, CameraId, StreamTarget, Timestamp};
use crate::playback::{PlaybackController, PlaybackRequest, PlaybackState, PlaybackStatus, VideoSurface};
use crate::router::Route;
use crate::session::SessionStore;
use crate::views::camera::CameraDetail;
use crate::views::cameras::CameraListView;
use crate::views::display_local;
use crate::views::login::{self, LoginOutcome};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "camview", version, about = "Browse cameras and play back recorded segments")]
pub struct Cli {
    /// Config file used instead of the built-in defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Exchange a personal access token for a session
    Login { token: String },
    /// Forget the stored session
    Logout,
    /// List cameras
    Cameras,
    /// Show one camera with its recording info and timeline
    Camera { id: CameraId },
    /// Play one recorded segment until it ends or Ctrl-C
    Segment {
        id: CameraId,
        #[arg(long, value_parser = parse_timestamp)]
        start: Timestamp,
        #[arg(long, value_parser = parse_timestamp)]
        end: Timestamp,
    },
    /// Play, pause or change the speed of a recording stream on the server.
    /// `domain` and `stream_id` are the `controls` of a segment's status.
    Control {
        domain: String,
        stream_id: String,
        #[command(subcommand)]
        action: ControlAction,
    },
    /// Navigate to a client route, e.g. `/cameras/3`
    Open { route: String },
    /// Start the graphical viewer
    Ui,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Play,
    Pause,
    Speed { speed: u32 },
}

impl From<ControlAction> for RecordingControl {
    fn from(action: ControlAction) -> Self {
        match action {
            ControlAction::Play => RecordingControl::Play,
            ControlAction::Pause => RecordingControl::Pause,
            ControlAction::Speed { speed } => RecordingControl::Speed(speed),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config)?;
    let store = SessionStore::new(&config.session);
    let api = ApiClient::new(&config.api);
    tracing::debug!("api at {}, session file {}", api.base_url(), store.path().display());

    let route = match cli.command {
        Command::Login { token } => {
            return match login::login(&api, &store, &token).await {
                LoginOutcome::Navigate(route) => {
                    println!("Logged in. Continue at {route}");
                    Ok(())
                }
                LoginOutcome::Alert(message) => bail!(message),
            };
        }
        Command::Logout => {
            let route = login::logout(&store).await?;
            println!("Logged out. Continue at {route}");
            return Ok(());
        }
        Command::Control {
            domain,
            stream_id,
            action,
        } => {
            let session = store.get().await.context("not logged in; run `camview login <token>`")?;
            let target = StreamTarget { domain, stream_id };
            let control = RecordingControl::from(action);
            let ack = api
                .with_session(&session)
                .control_recording(&target, control)
                .await
                .with_context(|| format!("recording {control} failed"))?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
            return Ok(());
        }
        Command::Ui => {
            let handle = tokio::runtime::Handle::current();
            return tokio::task::block_in_place(|| crate::dashboard::run_dashboard(config, handle));
        }
        Command::Cameras => Route::Cameras,
        Command::Camera { id } => Route::Camera(id),
        Command::Segment { id, start, end } => Route::segment(id, start, end),
        Command::Open { route } => Route::parse(&route)?,
    };

    navigate(&config, &store, &api, route).await
}

/// Show `route` the way the viewer would, after applying the session guard.
async fn navigate(config: &AppConfig, store: &SessionStore, api: &ApiClient, route: Route) -> Result<()> {
    let session = store.get().await;
    let landed = match &route {
        Route::Login => login::enter(store).await.unwrap_or(Route::Login),
        other => other.clone().guard(session.as_ref()),
    };
    if landed != route {
        tracing::info!("{} redirected to {}", route, landed);
    }

    let api = match (&landed, &session) {
        (Route::Login, _) | (_, None) => {
            println!("Not logged in. Run `camview login <token>`");
            return Ok(());
        }
        (_, Some(session)) => api.with_session(session),
    };

    match landed {
        Route::Login => Ok(()),
        Route::Cameras => {
            let view = CameraListView::load(&api).await.context("error fetching cameras")?;
            print!("{}", render_cameras(&view));
            Ok(())
        }
        Route::Camera(id) => {
            let detail = CameraDetail::load(&api, id, &CancellationToken::new())
                .await
                .with_context(|| format!("error fetching camera {id}"))?;
            print!("{}", render_camera(&detail));
            Ok(())
        }
        route @ Route::Segment { .. } => play_segment(config, api, &route).await,
    }
}

async fn play_segment(config: &AppConfig, api: ApiClient, route: &Route) -> Result<()> {
    let Some(request) = PlaybackRequest::from_route(route) else {
        // without a full range nothing is played
        println!("{}", serde_json::to_string_pretty(&PlaybackStatus::default())?);
        return Ok(());
    };

    let surface = VideoSurface::from_config(&config.player);
    let mut controller = PlaybackController::new(api, surface, &config.player);
    let mut status = controller.open(request).await;
    if let Some(session) = controller.session() {
        let req = session.request();
        tracing::info!(
            "playing camera {} from {} to {}",
            req.camera_id,
            format_timestamp(&req.start),
            format_timestamp(&req.end)
        );
    }

    tokio::select! {
        done = status.wait_for(|s| s.ended || s.state.is_terminal()) => {
            if done.is_err() {
                tracing::warn!("playback task went away");
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, detaching"),
    }

    let last = controller.close().await.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&last)?);
    if let PlaybackState::Error(e) = &last.state {
        bail!("playback failed: {e}");
    }
    Ok(())
}

fn render_cameras(view: &CameraListView) -> String {
    let mut out = String::new();
    for card in &view.cards {
        let recording = if card.has_recording { "recording" } else { "" };
        let _ = writeln!(out, "{:>6}  {:<32} {:<10} {}", card.id, card.name, card.status, recording);
    }
    let _ = writeln!(out, "{} of {} cameras", view.cards.len(), view.total);
    out
}

fn render_camera(detail: &CameraDetail) -> String {
    use crate::views::camera::LiveView;

    let camera = &detail.camera;
    let mut out = String::new();
    let _ = writeln!(out, "{} (#{})", camera.name, camera.id);
    let _ = writeln!(out, "Owner: {} <{}>", camera.owner.full_name(), camera.owner.email);

    match &detail.live {
        LiveView::Video { url, .. } => {
            let _ = writeln!(out, "Live video: {url}");
        }
        LiveView::Image { url } => {
            let _ = writeln!(out, "Live image: {url}");
        }
        other => {
            let _ = writeln!(out, "{}", other.message().unwrap_or_default());
        }
    }
    if let Some(link) = &detail.live_link {
        let _ = writeln!(out, "View live stream: {link}");
    }

    match &detail.recording {
        Ok(info) => {
            let _ = writeln!(out, "Recording: {} (retention {})", info.status, info.retention);
            let _ = writeln!(
                out,
                "  {} to {}",
                display_local(&info.recording_start),
                display_local(&info.recording_end)
            );
        }
        Err(_) => {
            let _ = writeln!(out, "Recording info unavailable");
        }
    }

    match &detail.timeline {
        Some(Ok(timeline)) => {
            for (i, card) in timeline.cards.iter().enumerate() {
                let route = timeline.select(i).map(|r| r.to_string()).unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  {}: {} - {}  {}",
                    card.label,
                    format_timestamp(&card.segment.start),
                    format_timestamp(&card.segment.end),
                    route
                );
            }
        }
        Some(Err(_)) => {
            let _ = writeln!(out, "Timeline unavailable");
        }
        None => {}
    }
    out
}
