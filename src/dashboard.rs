use crate::config::AppConfig;
use tokio::runtime::Handle;

#[cfg(feature = "ui")]
use crate::api::{ApiClient, ApiError, ControlAck, RecordingControl};
#[cfg(feature = "ui")]
use crate::model::{CameraId, Session, StreamTarget};
#[cfg(feature = "ui")]
use crate::playback::{PlaybackController, PlaybackState, PlaybackStatus, PlayerCommand, VideoSurface};
#[cfg(feature = "ui")]
use crate::router::Route;
#[cfg(feature = "ui")]
use crate::session::SessionStore;
#[cfg(feature = "ui")]
use crate::views::{camera::CameraDetail, camera::LiveView, cameras::CameraListView, display_local, login};
#[cfg(feature = "ui")]
use eframe::egui;
#[cfg(feature = "ui")]
use tokio::sync::{mpsc, watch};
#[cfg(feature = "ui")]
use tokio_util::sync::CancellationToken;

/// Results of background work, drained once per frame.
#[cfg(feature = "ui")]
enum Message {
    Session(Option<Session>),
    LoggedIn(login::LoginOutcome, Option<Session>),
    LoggedOut(anyhow::Result<Route>),
    Cameras(Result<CameraListView, ApiError>),
    Camera(CameraId, Result<CameraDetail, ApiError>),
    Playback(Route, Option<watch::Receiver<PlaybackStatus>>),
    Control(RecordingControl, Result<ControlAck, ApiError>),
}

#[cfg(feature = "ui")]
pub struct ViewerApp {
    config: AppConfig,
    runtime: Handle,
    api: ApiClient,
    store: SessionStore,
    session: Option<Session>,
    route: Route,
    address: String,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    form: login::LoginForm,
    alert: Option<String>,
    cameras: Option<Result<CameraListView, String>>,
    detail: Option<Result<CameraDetail, String>>,
    detail_cancel: Option<CancellationToken>,
    player: Option<mpsc::UnboundedSender<PlayerCommand>>,
    playback: Option<watch::Receiver<PlaybackStatus>>,
    speed: u32,
}

#[cfg(feature = "ui")]
pub fn run_dashboard(config: AppConfig, runtime: Handle) -> anyhow::Result<()> {
    let app = ViewerApp::new(config, runtime);
    let options = eframe::NativeOptions::default();
    eframe::run_native("Camera Viewer", options, Box::new(move |_cc| Box::new(app)))
        .map_err(|e| anyhow::anyhow!("viewer window failed: {e}"))?;
    Ok(())
}

#[cfg(feature = "ui")]
impl ViewerApp {
    fn new(config: AppConfig, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = ApiClient::new(&config.api);
        let store = SessionStore::new(&config.session);

        let startup = store.clone();
        let sender = tx.clone();
        runtime.spawn(async move {
            let _ = sender.send(Message::Session(startup.get().await));
        });

        Self {
            config,
            runtime,
            api,
            store,
            session: None,
            route: Route::Login,
            address: Route::Login.to_string(),
            tx,
            rx,
            form: login::LoginForm::default(),
            alert: None,
            cameras: None,
            detail: None,
            detail_cancel: None,
            player: None,
            playback: None,
            speed: 1,
        }
    }

    fn authed(&self) -> Option<ApiClient> {
        self.session.as_ref().map(|s| self.api.with_session(s))
    }

    fn set_session(&mut self, session: Option<Session>) {
        // dropping the sender stops the old controller task, which closes its session
        self.player = None;
        self.playback = None;
        self.player = self.session_player(session.as_ref());
        self.session = session;
    }

    /// Spawn the task that owns this session's player. Commands are applied
    /// strictly in the order they are sent.
    fn session_player(&self, session: Option<&Session>) -> Option<mpsc::UnboundedSender<PlayerCommand>> {
        let api = self.api.with_session(session?);
        let surface = VideoSurface::from_config(&self.config.player);
        let controller = PlaybackController::new(api, surface, &self.config.player);
        let (commands, rx) = mpsc::unbounded_channel();
        let tx = self.tx.clone();
        self.runtime.spawn(controller.serve(rx, move |route, status| {
            let _ = tx.send(Message::Playback(route.clone(), status));
        }));
        Some(commands)
    }

    fn command_player(&self, command: PlayerCommand) {
        if let Some(player) = &self.player {
            if player.send(command).is_err() {
                tracing::warn!("player task is gone");
            }
        }
    }

    fn control(&self, control: RecordingControl, target: StreamTarget) {
        let Some(api) = self.authed() else {
            return;
        };
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let result = api.control_recording(&target, control).await;
            let _ = tx.send(Message::Control(control, result));
        });
    }

    fn navigate(&mut self, route: Route) {
        let route = route.guard(self.session.as_ref());
        tracing::debug!("navigating to {}", route);

        if let Some(cancel) = self.detail_cancel.take() {
            cancel.cancel();
        }
        if !matches!(route, Route::Segment { .. }) {
            self.playback = None;
            self.command_player(PlayerCommand::Close);
        }

        match &route {
            Route::Login => {}
            Route::Cameras => {
                self.cameras = None;
                if let Some(api) = self.authed() {
                    let tx = self.tx.clone();
                    self.runtime.spawn(async move {
                        let _ = tx.send(Message::Cameras(CameraListView::load(&api).await));
                    });
                }
            }
            Route::Camera(id) => {
                self.detail = None;
                if let Some(api) = self.authed() {
                    let cancel = CancellationToken::new();
                    self.detail_cancel = Some(cancel.clone());
                    let (id, tx) = (*id, self.tx.clone());
                    self.runtime.spawn(async move {
                        let _ = tx.send(Message::Camera(id, CameraDetail::load(&api, id, &cancel).await));
                    });
                }
            }
            Route::Segment { .. } => self.command_player(PlayerCommand::Open(route.clone())),
        }

        self.address = route.to_string();
        self.route = route;
    }

    fn submit_login(&mut self) {
        self.form.loading = true;
        let (api, store, tx) = (self.api.clone(), self.store.clone(), self.tx.clone());
        let mut form = self.form.clone();
        self.runtime.spawn(async move {
            let outcome = form.submit(&api, &store).await;
            let _ = tx.send(Message::LoggedIn(outcome, store.get().await));
        });
    }

    fn logout(&mut self) {
        let (store, tx) = (self.store.clone(), self.tx.clone());
        self.runtime.spawn(async move {
            let _ = tx.send(Message::LoggedOut(login::logout(&store).await));
        });
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Session(session) => {
                    self.set_session(session);
                    let route = self.route.clone();
                    self.navigate(route);
                }
                Message::LoggedIn(outcome, session) => {
                    self.form.loading = false;
                    match outcome {
                        login::LoginOutcome::Navigate(route) => {
                            self.set_session(session);
                            self.form.token.clear();
                            self.navigate(route);
                        }
                        login::LoginOutcome::Alert(message) => self.alert = Some(message),
                    }
                }
                Message::LoggedOut(result) => match result {
                    Ok(route) => {
                        self.set_session(None);
                        self.navigate(route);
                    }
                    Err(e) => self.alert = Some(format!("Logout failed: {e:#}")),
                },
                Message::Cameras(result) => {
                    self.cameras = Some(result.map_err(|e| {
                        tracing::error!("error fetching cameras: {}", e);
                        e.to_string()
                    }));
                }
                Message::Camera(id, result) => {
                    if self.route != Route::Camera(id) || matches!(result, Err(ApiError::Cancelled)) {
                        continue;
                    }
                    self.detail = Some(result.map_err(|e| e.to_string()));
                }
                Message::Playback(route, status) => {
                    if self.route == route {
                        self.playback = status;
                    }
                }
                Message::Control(control, result) => match result {
                    Ok(ack) => tracing::info!("recording {}: {:?}", control, ack),
                    Err(e) => self.alert = Some(format!("Recording {control} failed: {e}")),
                },
            }
        }
    }

    fn show_login(&mut self, ui: &mut egui::Ui) -> bool {
        let mut submit = false;
        ui.heading("Login");
        ui.separator();
        ui.label("Personal access token");
        let field = ui.add(egui::TextEdit::singleline(&mut self.form.token).password(true));
        if field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            submit = true;
        }
        ui.horizontal(|ui| {
            if ui.button("Login").clicked() {
                submit = true;
            }
            if self.form.loading {
                ui.spinner();
            }
        });
        submit
    }

    fn show_cameras(&self, ui: &mut egui::Ui) -> Option<Route> {
        let mut next = None;
        ui.heading("Cameras");
        ui.separator();
        match &self.cameras {
            None => {
                ui.spinner();
            }
            Some(Err(e)) => {
                ui.colored_label(egui::Color32::RED, format!("Error fetching cameras: {e}"));
            }
            Some(Ok(view)) => {
                ui.label(format!("{} of {} cameras", view.cards.len(), view.total));
                egui::Grid::new("camera_cards").striped(true).show(ui, |ui| {
                    for card in &view.cards {
                        if ui.link(card.name.as_str()).clicked() {
                            next = view.select(card.id);
                        }
                        ui.label(card.status.as_str());
                        ui.label(if card.has_recording { "recording" } else { "" });
                        ui.end_row();
                    }
                });
            }
        }
        next
    }

    fn show_camera(&self, ui: &mut egui::Ui) -> Option<Route> {
        let mut next = None;
        let detail = match &self.detail {
            None => {
                ui.spinner();
                return None;
            }
            Some(Err(e)) => {
                ui.colored_label(egui::Color32::RED, format!("Error fetching camera: {e}"));
                return None;
            }
            Some(Ok(detail)) => detail,
        };

        let camera = &detail.camera;
        ui.heading(camera.name.as_str());
        ui.label(format!("Owner: {} <{}>", camera.owner.full_name(), camera.owner.email));
        ui.separator();

        ui.group(|ui| {
            match &detail.live {
                LiveView::Video { url, .. } => {
                    ui.label("Live video (autoplay, muted)");
                    ui.hyperlink(url);
                }
                LiveView::Image { url } => {
                    ui.label("Live image");
                    ui.hyperlink(url);
                }
                other => {
                    ui.label(other.message().unwrap_or_default());
                }
            }
            if let Some(link) = &detail.live_link {
                ui.hyperlink_to("View live stream in new tab", link);
            }
        });

        ui.separator();
        match &detail.recording {
            Ok(info) => {
                ui.label(format!("Recording: {} (retention {})", info.status, info.retention));
                ui.label(format!(
                    "{} to {}",
                    display_local(&info.recording_start),
                    display_local(&info.recording_end)
                ));
            }
            Err(_) => {
                ui.label("Recording info unavailable");
            }
        }

        match &detail.timeline {
            Some(Ok(timeline)) => {
                egui::ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
                    for (i, card) in timeline.cards.iter().enumerate() {
                        let text = format!(
                            "{}: {} - {}",
                            card.label,
                            display_local(&card.segment.start),
                            display_local(&card.segment.end)
                        );
                        if ui.button(text).clicked() {
                            next = timeline.select(i);
                        }
                    }
                });
            }
            Some(Err(e)) => {
                ui.colored_label(egui::Color32::YELLOW, format!("Timeline unavailable: {e}"));
            }
            None => {}
        }
        next
    }

    fn show_segment(&mut self, ui: &mut egui::Ui) -> Option<Route> {
        let Route::Segment { id, .. } = &self.route else {
            return None;
        };
        let id = *id;
        let mut next = None;
        ui.horizontal(|ui| {
            if ui.button("< Camera").clicked() {
                next = Some(Route::Camera(id));
            }
            ui.heading(format!("Recorded segment, camera {id}"));
        });
        ui.separator();

        let Some(status) = self.playback.as_ref().map(|rx| rx.borrow().clone()) else {
            ui.label("Nothing to play");
            return next;
        };
        match &status.state {
            PlaybackState::Error(e) => {
                ui.colored_label(egui::Color32::RED, e.to_string());
            }
            state => {
                ui.label(format!("State: {state:?}"));
            }
        }
        if let Some(sink) = status.sink {
            ui.label(format!("Player: {sink}"));
        }
        ui.label(format!("Fragments loaded: {}", status.fragments_loaded));
        if status.start_rejected {
            ui.colored_label(egui::Color32::YELLOW, "The player refused to start");
        }
        if let Some(e) = &status.last_error {
            ui.colored_label(egui::Color32::YELLOW, e.to_string());
        }
        if status.ended {
            ui.label("Segment ended");
        }

        if let Some(target) = status.controls {
            ui.separator();
            let mut action = None;
            ui.horizontal(|ui| {
                if ui.button("Play").clicked() {
                    action = Some(RecordingControl::Play);
                }
                if ui.button("Pause").clicked() {
                    action = Some(RecordingControl::Pause);
                }
                ui.add(egui::DragValue::new(&mut self.speed).clamp_range(0..=16).suffix("x"));
                if ui.button("Set speed").clicked() {
                    action = Some(RecordingControl::Speed(self.speed));
                }
            });
            if let Some(action) = action {
                self.control(action, target);
            }
        }
        next
    }
}

#[cfg(feature = "ui")]
impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_messages();

        let mut next: Option<Route> = None;
        let mut logout = false;
        egui::TopBottomPanel::top("navigation").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let address = ui.text_edit_singleline(&mut self.address);
                if address.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    match Route::parse(&self.address) {
                        Ok(route) => next = Some(route),
                        Err(e) => self.alert = Some(e.to_string()),
                    }
                }
                if self.session.is_some() {
                    if ui.button("Cameras").clicked() {
                        next = Some(Route::Cameras);
                    }
                    if ui.button("Logout").clicked() {
                        logout = true;
                    }
                }
            });
        });

        let mut submit = false;
        let route = self.route.clone();
        egui::CentralPanel::default().show(ctx, |ui| match route {
            Route::Login => submit = self.show_login(ui),
            Route::Cameras => next = next.take().or(self.show_cameras(ui)),
            Route::Camera(_) => next = next.take().or(self.show_camera(ui)),
            Route::Segment { .. } => next = next.take().or(self.show_segment(ui)),
        });

        if let Some(message) = self.alert.clone() {
            egui::Window::new("Alert").collapsible(false).resizable(false).show(ctx, |ui| {
                ui.label(message.as_str());
                if ui.button("OK").clicked() {
                    self.alert = None;
                }
            });
        }

        if submit {
            self.submit_login();
        }
        if logout {
            self.logout();
        }
        if let Some(route) = next {
            self.navigate(route);
        }

        ctx.request_repaint_after(std::time::Duration::from_millis(250));
    }
}

#[cfg(not(feature = "ui"))]
pub fn run_dashboard(_config: AppConfig, _runtime: Handle) -> anyhow::Result<()> {
    tracing::info!("The viewer requires the 'ui' feature. Build with: cargo build --features ui");
    Ok(())
}
