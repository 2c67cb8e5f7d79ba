//! Live/Test/Idle mode state machine for the camera streams.
//!
//! The controller is a reducer: [`StreamSessionController::apply`] takes one
//! [`SessionCommand`], sends whatever protocol messages the transition needs
//! through the shared [`ConnectionHandle`], and returns the effects the caller
//! must run. Default-model lookups are the only asynchronous step. Each one is
//! tagged with a ticket, and a resolution whose ticket is no longer pending is
//! dropped.

use std::collections::BTreeMap;

use bss_network::ConnectionHandle;
use bss_types::{
    camera::{CameraChannel, CameraId},
    config::{DashboardSettings, ModelFailurePolicy},
    events::Notice,
    protocol::{FrameTarget, OutboundMessage, StartStream, StopStream, VideoFrame},
    session::{ModelResolution, Operator, SessionMode, TargetMode, View},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// The backend connection is open.
    Connect,
    ModeChange(TargetMode),
    ModelResolved {
        ticket: u64,
        resolution: ModelResolution,
    },
    FrameReceived(VideoFrame),
    Navigate(View),
    /// The backend connection dropped; nothing can be sent.
    ConnectionLost,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Fetch the default model and answer with [`SessionCommand::ModelResolved`].
    FetchDefaultModel { ticket: u64 },
    Alert(Notice),
    FrameApplied {
        camera_id: CameraId,
        person_detected: bool,
    },
}

pub struct StreamSessionController {
    connection: ConnectionHandle,
    operator: Option<Operator>,
    cameras: Vec<CameraId>,
    channels: BTreeMap<CameraId, CameraChannel>,
    mode: SessionMode,
    view: View,
    default_model: Option<String>,
    fallback_model: String,
    failure_policy: ModelFailurePolicy,
    next_ticket: u64,
    pending_fetch: Option<u64>,
}

impl StreamSessionController {
    pub fn new(connection: ConnectionHandle, settings: &DashboardSettings) -> Self {
        Self {
            connection,
            operator: None,
            cameras: settings.camera_ids.clone(),
            channels: BTreeMap::new(),
            mode: SessionMode::Idle,
            view: View::Root,
            default_model: None,
            fallback_model: settings.fallback_model.clone(),
            failure_policy: settings.on_model_failure,
            next_ticket: 0,
            pending_fetch: None,
        }
    }

    pub fn set_operator(&mut self, operator: Operator) {
        self.operator = Some(operator);
    }

    pub fn operator(&self) -> Option<&Operator> {
        self.operator.as_ref()
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn cameras(&self) -> &[CameraId] {
        &self.cameras
    }

    pub fn channel(&self, id: CameraId) -> Option<&CameraChannel> {
        self.channels.get(&id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &CameraChannel> {
        self.channels.values()
    }

    pub fn streaming_cameras(&self) -> Vec<CameraId> {
        self.channels
            .values()
            .filter(|channel| channel.streaming)
            .map(|channel| channel.id)
            .collect()
    }

    /// Model the live streams were last started with.
    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    pub fn pending_fetch(&self) -> Option<u64> {
        self.pending_fetch
    }

    pub fn apply(&mut self, command: SessionCommand) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match command {
            SessionCommand::Connect => self.on_connect(&mut effects),
            SessionCommand::ModeChange(target) => self.on_mode_change(target, &mut effects),
            SessionCommand::ModelResolved { ticket, resolution } => {
                self.on_model_resolved(ticket, resolution, &mut effects)
            }
            SessionCommand::FrameReceived(frame) => self.on_frame(frame, &mut effects),
            SessionCommand::Navigate(view) => self.on_navigate(view, &mut effects),
            SessionCommand::ConnectionLost => self.on_connection_lost(),
            SessionCommand::Shutdown => {
                self.stop_all();
                self.pending_fetch = None;
                self.enter(SessionMode::Idle);
            }
        }
        effects
    }

    fn on_connect(&mut self, effects: &mut Vec<SessionEffect>) {
        let stalled_live = self.mode == SessionMode::Live && self.streaming_cameras().is_empty();
        if self.mode == SessionMode::Idle || stalled_live {
            self.begin_live(effects);
        } else {
            debug!(mode = ?self.mode, "connect ignored in current mode");
        }
    }

    fn on_mode_change(&mut self, target: TargetMode, effects: &mut Vec<SessionEffect>) {
        match target {
            TargetMode::Live => match self.mode {
                SessionMode::Live | SessionMode::Transitioning => {
                    debug!("already live or resolving the default model");
                }
                SessionMode::Idle | SessionMode::Test => self.begin_live(effects),
            },
            TargetMode::Test => {
                if !self.operator.as_ref().is_some_and(Operator::is_privileged) {
                    warn!("test mode requested by a non-admin operator");
                    effects.push(SessionEffect::Alert(Notice::warning(
                        "Test analysis is available to administrators only",
                    )));
                    return;
                }
                if self.mode == SessionMode::Test {
                    return;
                }
                self.stop_all();
                self.pending_fetch = None;
                self.enter(SessionMode::Test);
            }
            TargetMode::Idle => {
                self.stop_all();
                self.pending_fetch = None;
                self.enter(SessionMode::Idle);
            }
        }
    }

    fn on_model_resolved(
        &mut self,
        ticket: u64,
        resolution: ModelResolution,
        effects: &mut Vec<SessionEffect>,
    ) {
        if self.pending_fetch != Some(ticket) || self.mode != SessionMode::Transitioning {
            debug!(ticket, pending = ?self.pending_fetch, "stale default model dropped");
            return;
        }
        self.pending_fetch = None;

        match resolution {
            ModelResolution::Resolved(model) => {
                info!(%model, "default model resolved");
                self.default_model = Some(model);
                self.start_all(effects);
            }
            ModelResolution::Failed(reason) => match self.failure_policy {
                ModelFailurePolicy::Degrade => {
                    warn!(%reason, fallback = %self.fallback_model, "default model unavailable");
                    effects.push(SessionEffect::Alert(Notice::warning(format!(
                        "Default model unavailable ({reason}); streaming with {}",
                        self.fallback_model
                    ))));
                    self.default_model = Some(self.fallback_model.clone());
                    self.start_all(effects);
                }
                ModelFailurePolicy::Block => {
                    warn!(%reason, "default model unavailable; live streaming blocked");
                    effects.push(SessionEffect::Alert(Notice::error(format!(
                        "Default model unavailable ({reason}); live streaming paused"
                    ))));
                    self.enter(SessionMode::Idle);
                }
            },
        }
    }

    fn on_frame(&mut self, frame: VideoFrame, effects: &mut Vec<SessionEffect>) {
        let FrameTarget::Camera(camera_id) = frame.camera_id else {
            return;
        };
        if self.mode != SessionMode::Live {
            debug!(%camera_id, mode = ?self.mode, "frame outside live mode dropped");
            return;
        }
        let Some(channel) = self
            .channels
            .get_mut(&camera_id)
            .filter(|channel| channel.streaming)
        else {
            debug!(%camera_id, "frame for an unsubscribed camera dropped");
            return;
        };

        if let Some(rgb) = frame.rgb {
            channel.rgb_frame = Some(rgb);
        }
        if let Some(tir) = frame.tir {
            channel.thermal_frame = Some(tir);
        }
        channel.person_detected = frame.person_detected;
        effects.push(SessionEffect::FrameApplied {
            camera_id,
            person_detected: frame.person_detected,
        });
    }

    fn on_navigate(&mut self, view: View, effects: &mut Vec<SessionEffect>) {
        let previous = std::mem::replace(&mut self.view, view);
        if view == View::Root && previous != View::Root && self.mode == SessionMode::Live {
            info!("back on the dashboard; resyncing live streams");
            self.begin_live(effects);
        }
    }

    fn on_connection_lost(&mut self) {
        for channel in self.channels.values_mut() {
            channel.streaming = false;
        }
        self.channels.clear();
        self.pending_fetch = None;
        self.enter(SessionMode::Idle);
    }

    /// Stop whatever streams and wait for a fresh default model.
    fn begin_live(&mut self, effects: &mut Vec<SessionEffect>) {
        self.stop_all();
        self.next_ticket += 1;
        self.pending_fetch = Some(self.next_ticket);
        self.enter(SessionMode::Transitioning);
        effects.push(SessionEffect::FetchDefaultModel {
            ticket: self.next_ticket,
        });
    }

    fn start_all(&mut self, effects: &mut Vec<SessionEffect>) {
        let Some(operator) = self.operator.clone() else {
            warn!("no operator profile; live streams not started");
            effects.push(SessionEffect::Alert(Notice::error(
                "Operator profile unavailable; live streaming paused",
            )));
            self.enter(SessionMode::Idle);
            return;
        };
        let model = operator
            .is_privileged()
            .then(|| self.default_model.clone())
            .flatten();

        self.channels.clear();
        for &camera_id in &self.cameras {
            let mut channel = CameraChannel::new(camera_id);
            channel.streaming = self.connection.send(OutboundMessage::StartStream(StartStream {
                camera_id,
                model: model.clone(),
                user_id: operator.id,
            }));
            self.channels.insert(camera_id, channel);
        }
        self.enter(SessionMode::Live);
    }

    fn stop_all(&mut self) {
        for channel in self.channels.values_mut().filter(|c| c.streaming) {
            self.connection
                .send(OutboundMessage::StopStream(StopStream {
                    camera_id: channel.id,
                }));
            channel.streaming = false;
        }
        self.channels.clear();
    }

    fn enter(&mut self, mode: SessionMode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "session mode change");
            self.mode = mode;
        }
    }
}
