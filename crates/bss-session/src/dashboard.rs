//! Root dashboard session.
//!
//! Owns the backend connection and drives the stream and test-analysis
//! controllers from one cooperative loop: inbound messages, connection
//! lifecycle, operator commands, REST completions and the playback tick all
//! funnel through [`DashboardSession::run`], so controller state is only ever
//! touched from a single task.

use std::sync::Arc;

use bss_feed::{EventFeed, PushOutcome};
use bss_media::{DualMediaSynchronizer, MediaElement};
use bss_network::{
    ConnectionManager, ConnectionState, Connector, DashboardApi, EventPage, Subscription,
};
use bss_ops::NoticeBoard;
use bss_types::{
    camera::{CameraId, FrameImage},
    config::DashboardConfig,
    detection::DetectionEvent,
    events::{
        ConnectionEvent, DashboardEvent, DashboardPayload, FeedSummary, LiveFrameSummary, Notice,
        TestCatalog, TestFrameSummary, TestSessionStatus,
    },
    protocol::{FrameTarget, InboundMessage, MessageKind},
    session::{
        ModelResolution, Operator, PlaybackAction, SessionMode, TargetMode, TestSelection, View,
    },
    Result,
};
use futures::{stream::BoxStream, StreamExt};
use tokio::{
    sync::{broadcast, mpsc},
    time::{interval, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    analysis::TestAnalysisController,
    session_error,
    stream::{SessionCommand, SessionEffect, StreamSessionController},
};

const BUS_CAPACITY: usize = 256;

/// Requests coming from the operator surface.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    SwitchMode(TargetMode),
    Navigate(View),
    StartTest(TestSelection),
    StopTest,
    Playback(PlaybackAction),
    RefreshEvents,
    Reconnect,
    Shutdown,
}

/// Results of REST calls spawned off the loop.
enum Completion {
    Model {
        ticket: u64,
        resolution: ModelResolution,
    },
    Profile(Result<Operator>),
    Feed(Result<Vec<DetectionEvent>>),
    Catalog(Result<TestCatalog>),
}

struct Inbox {
    responses: Subscription,
    frames: Subscription,
    pushes: Subscription,
    errors: Subscription,
    lifecycle: BoxStream<'static, ConnectionEvent>,
}

pub struct DashboardSession<M: MediaElement> {
    connection: ConnectionManager,
    api: Arc<dyn DashboardApi>,
    token: Option<String>,
    stream: StreamSessionController,
    analysis: TestAnalysisController<M>,
    feed: EventFeed,
    feed_page: EventPage,
    notices: NoticeBoard,
    catalog: TestCatalog,
    bus: broadcast::Sender<DashboardEvent>,
    inbox: Inbox,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    tick_interval: Duration,
}

impl<M: MediaElement + 'static> DashboardSession<M> {
    pub fn new(
        config: &DashboardConfig,
        connector: Arc<dyn Connector>,
        api: Arc<dyn DashboardApi>,
        master: M,
        slave: M,
    ) -> Self {
        let connection = ConnectionManager::new(connector);
        let handle = connection.handle();
        // Subscribed before the first connect so nothing early is missed.
        let inbox = Inbox {
            responses: handle.subscribe(MessageKind::Response),
            frames: handle.subscribe(MessageKind::VideoFrame),
            pushes: handle.subscribe(MessageKind::NewEvent),
            errors: handle.subscribe(MessageKind::Error),
            lifecycle: handle.lifecycle(),
        };
        let media = DualMediaSynchronizer::new(master, slave, config.media.drift_epsilon_secs);
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            stream: StreamSessionController::new(handle.clone(), &config.dashboard),
            analysis: TestAnalysisController::new(handle, media),
            connection,
            api,
            token: config.backend.auth_token.clone(),
            feed: EventFeed::from_settings(&config.dashboard),
            feed_page: EventPage::first(config.dashboard.initial_feed_capacity as u32),
            notices: NoticeBoard::new(config.ops.notice_capacity),
            catalog: TestCatalog::default(),
            bus,
            inbox,
            completions_tx,
            completions_rx,
            tick_interval: Duration::from_millis(config.media.tick_interval_ms.max(1)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.bus.subscribe()
    }

    pub fn stream(&self) -> &StreamSessionController {
        &self.stream
    }

    pub fn analysis(&self) -> &TestAnalysisController<M> {
        &self.analysis
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Load the operator profile and event history, then open the connection.
    /// Live streaming starts once the connection reports itself open.
    ///
    /// REST failures become notices; without a profile the session stays idle
    /// until [`OperatorCommand::Reconnect`] fetches it again.
    pub async fn boot(&mut self) {
        match self.api.profile().await {
            Ok(operator) => self.adopt_operator(operator),
            Err(err) => {
                self.notify(Notice::error(format!("Operator profile unavailable: {err}")))
                    .await
            }
        }

        match self.feed.load_initial(self.api.as_ref()).await {
            Ok(_) => self.publish_feed(),
            Err(err) => {
                self.notify(Notice::warning(format!("Event history unavailable: {err}")))
                    .await
            }
        }

        if self.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            self.notify(Notice::warning(
                "No auth token configured; live streaming is unavailable",
            ))
            .await;
        }
        self.connection.connect(self.token.as_deref()).await;
    }

    fn adopt_operator(&mut self, operator: Operator) {
        info!(
            operator = %operator.username,
            privileged = operator.is_privileged(),
            "operator profile loaded"
        );
        self.stream.set_operator(operator);
    }

    pub async fn run(&mut self, mut commands: mpsc::Receiver<OperatorCommand>) -> Result<()> {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(OperatorCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.inbox.lifecycle.next() => self.on_lifecycle(event).await,
                Some(message) = self.inbox.frames.next() => self.on_inbound(message).await,
                Some(message) = self.inbox.pushes.next() => self.on_inbound(message).await,
                Some(message) = self.inbox.responses.next() => self.on_inbound(message).await,
                Some(message) = self.inbox.errors.next() => self.on_inbound(message).await,
                Some(completion) = self.completions_rx.recv() => self.on_completion(completion).await,
                now = ticker.tick() => {
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;
                    self.on_tick(elapsed);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("dashboard session shutting down");
        if self.analysis.stop() {
            self.publish(DashboardPayload::TestSession(TestSessionStatus::Stopped));
        }
        self.dispatch(SessionCommand::Shutdown).await;
        self.connection.disconnect();
    }

    async fn handle_command(&mut self, command: OperatorCommand) {
        debug!(?command, "operator command");
        match command {
            OperatorCommand::SwitchMode(target) => {
                self.dispatch(SessionCommand::ModeChange(target)).await
            }
            OperatorCommand::Navigate(view) => self.dispatch(SessionCommand::Navigate(view)).await,
            OperatorCommand::StartTest(selection) => self.start_test(selection).await,
            OperatorCommand::StopTest => {
                if self.analysis.stop() {
                    self.publish(DashboardPayload::TestSession(TestSessionStatus::Stopped));
                }
            }
            OperatorCommand::Playback(action) => {
                if let Err(err) = self.analysis.control(action) {
                    self.notify(Notice::warning(err.to_string())).await;
                }
            }
            OperatorCommand::RefreshEvents => self.spawn_feed_fetch(),
            OperatorCommand::Reconnect => {
                if self.stream.operator().is_none() {
                    self.spawn_profile_fetch();
                }
                self.connection.connect(self.token.as_deref()).await;
            }
            OperatorCommand::Shutdown => {}
        }
    }

    async fn start_test(&mut self, selection: TestSelection) {
        if self.stream.mode() != SessionMode::Test {
            let err = session_error("switch to test mode before starting an analysis");
            self.notify(Notice::warning(err.to_string())).await;
            return;
        }
        let started = self
            .analysis
            .start(selection)
            .map(|session| TestSessionStatus::Started {
                rgb: session.rgb_source.clone(),
                thermal: session.thermal_source.clone(),
                model: session.model.clone(),
            });
        match started {
            Ok(status) => self.publish(DashboardPayload::TestSession(status)),
            Err(err) => self.notify(Notice::warning(err.to_string())).await,
        }
    }

    /// Feed one command through the stream controller and carry out its effects.
    async fn dispatch(&mut self, command: SessionCommand) {
        let before = self.stream.mode();
        for effect in self.stream.apply(command) {
            match effect {
                SessionEffect::FetchDefaultModel { ticket } => self.spawn_model_fetch(ticket),
                SessionEffect::Alert(notice) => self.notify(notice).await,
                SessionEffect::FrameApplied {
                    camera_id,
                    person_detected,
                } => self.publish_live_frame(camera_id, person_detected),
            }
        }

        let after = self.stream.mode();
        if before == after {
            return;
        }
        if before == SessionMode::Test && self.analysis.stop() {
            self.publish(DashboardPayload::TestSession(TestSessionStatus::Stopped));
        }
        if after == SessionMode::Test {
            self.spawn_catalog_fetch();
        }
        self.publish(DashboardPayload::ModeChanged(after));
    }

    async fn on_lifecycle(&mut self, event: ConnectionEvent) {
        self.publish(DashboardPayload::Connection(event.clone()));
        match event {
            ConnectionEvent::Connected => self.dispatch(SessionCommand::Connect).await,
            ConnectionEvent::Disconnected => {
                self.dispatch(SessionCommand::ConnectionLost).await;
                self.notify(Notice::warning("Connection to the backend was lost"))
                    .await;
            }
            ConnectionEvent::ConnectError(reason) => {
                self.notify(Notice::error(format!("Backend connection failed: {reason}")))
                    .await
            }
        }
    }

    async fn on_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Response(response) => self.notify(Notice::info(response.message)).await,
            InboundMessage::Error(error) => self.notify(Notice::error(error.message)).await,
            InboundMessage::VideoFrame(frame) => match frame.camera_id {
                FrameTarget::Camera(_) => {
                    self.dispatch(SessionCommand::FrameReceived(frame)).await
                }
                FrameTarget::TestVideo => {
                    if self.analysis.on_frame(frame) {
                        self.publish_test_frame();
                    }
                }
                FrameTarget::Other(ref target) => {
                    debug!(%target, "frame for an unknown target dropped")
                }
            },
            InboundMessage::NewEvent(event) => {
                let class = event.object_class();
                let band = event.confidence_band();
                if self.feed.push(event) == PushOutcome::Inserted {
                    info!(?class, ?band, "detection event received");
                    self.publish_feed();
                }
            }
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Model { ticket, resolution } => {
                self.dispatch(SessionCommand::ModelResolved { ticket, resolution })
                    .await
            }
            Completion::Profile(Ok(operator)) => {
                self.adopt_operator(operator);
                let stalled = self.stream.mode() == SessionMode::Idle
                    && self.connection.state() == ConnectionState::Connected;
                if stalled {
                    self.dispatch(SessionCommand::Connect).await;
                }
            }
            Completion::Profile(Err(err)) => {
                self.notify(Notice::error(format!("Operator profile unavailable: {err}")))
                    .await
            }
            Completion::Feed(Ok(events)) => {
                self.feed.apply_initial(events);
                self.publish_feed();
            }
            Completion::Feed(Err(err)) => {
                self.notify(Notice::warning(format!("Event refresh failed: {err}")))
                    .await
            }
            Completion::Catalog(Ok(catalog)) => {
                debug!(
                    videos = catalog.videos.len(),
                    models = catalog.models.len(),
                    "test catalog loaded"
                );
                self.catalog = catalog.clone();
                self.publish(DashboardPayload::TestCatalog(catalog));
            }
            Completion::Catalog(Err(err)) => {
                self.notify(Notice::warning(format!("Test catalog unavailable: {err}")))
                    .await
            }
        }
    }

    fn on_tick(&mut self, elapsed: Duration) {
        if !self.analysis.is_active() {
            return;
        }
        self.analysis.advance(elapsed);
        if let Some(tick) = self.analysis.on_timeupdate() {
            if tick.corrected {
                debug!(drift = tick.clock.drift(), "thermal playback resynced");
            }
        }
    }

    fn spawn_model_fetch(&self, ticket: u64) {
        let api = self.api.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let resolution = match api.default_model().await {
                Ok(model) => ModelResolution::Resolved(model),
                Err(err) => ModelResolution::Failed(err.to_string()),
            };
            let _ = tx.send(Completion::Model { ticket, resolution });
        });
    }

    fn spawn_profile_fetch(&self) {
        let api = self.api.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Completion::Profile(api.profile().await));
        });
    }

    fn spawn_feed_fetch(&self) {
        let api = self.api.clone();
        let tx = self.completions_tx.clone();
        let page = self.feed_page;
        tokio::spawn(async move {
            let _ = tx.send(Completion::Feed(api.events(page).await));
        });
    }

    fn spawn_catalog_fetch(&self) {
        let api = self.api.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Completion::Catalog(fetch_catalog(api.as_ref()).await));
        });
    }

    async fn notify(&mut self, notice: Notice) {
        self.notices.post(notice.clone()).await;
        self.publish(DashboardPayload::Notice(notice));
    }

    fn publish(&self, payload: DashboardPayload) {
        // Err only means no UI is listening.
        let _ = self.bus.send(DashboardEvent::new(payload));
    }

    fn publish_feed(&self) {
        self.publish(DashboardPayload::FeedUpdated(FeedSummary {
            len: self.feed.len(),
            entries: self.feed.entries().cloned().collect(),
        }));
    }

    fn publish_live_frame(&self, camera_id: CameraId, person_detected: bool) {
        let Some(channel) = self.stream.channel(camera_id) else {
            return;
        };
        self.publish(DashboardPayload::LiveFrame(LiveFrameSummary {
            camera_id,
            rgb_bytes: image_len(channel.rgb_frame.as_ref()),
            thermal_bytes: image_len(channel.thermal_frame.as_ref()),
            person_detected,
        }));
        if person_detected {
            warn!(%camera_id, "person detected");
            self.publish(DashboardPayload::Alarm(camera_id));
        }
    }

    fn publish_test_frame(&self) {
        let Some(session) = self.analysis.session() else {
            return;
        };
        let overlay = self.analysis.overlay();
        self.publish(DashboardPayload::TestFrame(TestFrameSummary {
            rgb_bytes: image_len(overlay.rgb.as_ref()),
            thermal_bytes: image_len(overlay.thermal.as_ref()),
            playback: session.playback,
        }));
    }
}

async fn fetch_catalog(api: &dyn DashboardApi) -> Result<TestCatalog> {
    Ok(TestCatalog {
        videos: api.test_videos().await?,
        models: api.models().await?,
    })
}

fn image_len(image: Option<&FrameImage>) -> usize {
    image.map_or(0, FrameImage::len)
}
