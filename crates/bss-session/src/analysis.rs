//! Offline analysis of a recorded RGB/thermal pair.
//!
//! Local playback runs on a [`DualMediaSynchronizer`]; the backend runs the
//! model on its own copy and streams annotated frames back under the
//! `test_video` target. While a session is active every local playback gesture
//! is mirrored to the backend so both sides stay on the same timeline.

use std::time::Duration;

use bss_media::{DualMediaSynchronizer, MediaElement, SyncTick};
use bss_network::ConnectionHandle;
use bss_types::{
    camera::FrameImage,
    protocol::{
        ControlAction, FrameTarget, OutboundMessage, StartTestStream, StopTestStream,
        TestVideoControl, VideoFrame,
    },
    session::{PlaybackAction, TestSelection, TestSession},
    Result,
};
use tracing::{debug, info, warn};

/// Latest annotated frames returned for the active test session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayFrames {
    pub rgb: Option<FrameImage>,
    pub thermal: Option<FrameImage>,
}

impl OverlayFrames {
    pub fn clear(&mut self) {
        self.rgb = None;
        self.thermal = None;
    }
}

pub struct TestAnalysisController<M: MediaElement> {
    connection: ConnectionHandle,
    media: DualMediaSynchronizer<M>,
    session: Option<TestSession>,
    overlay: OverlayFrames,
}

impl<M: MediaElement> TestAnalysisController<M> {
    pub fn new(connection: ConnectionHandle, media: DualMediaSynchronizer<M>) -> Self {
        Self {
            connection,
            media,
            session: None,
            overlay: OverlayFrames::default(),
        }
    }

    pub fn session(&self) -> Option<&TestSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.active)
    }

    pub fn overlay(&self) -> &OverlayFrames {
        &self.overlay
    }

    pub fn media(&self) -> &DualMediaSynchronizer<M> {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut DualMediaSynchronizer<M> {
        &mut self.media
    }

    /// Validate the selection, rewind local playback and ask the backend to
    /// analyse the pair. Nothing is sent when validation or loading fails.
    pub fn start(&mut self, selection: TestSelection) -> Result<&TestSession> {
        let mut session = selection.into_session()?;
        self.media.load(&session.rgb_source, &session.thermal_source)?;
        self.media.reset()?;
        self.overlay.clear();

        if let Some(previous) = self.session.take().filter(|s| s.active) {
            debug!(rgb = %previous.rgb_source, "replacing active test session");
        }
        session.playback.duration = self.media.duration();
        session.playback.rate = self.media.rate();

        self.connection
            .send(OutboundMessage::StartTestStream(StartTestStream {
                rgb_filename: session.rgb_source.clone(),
                tir_filename: session.thermal_source.clone(),
                model: session.model.clone(),
            }));
        info!(
            rgb = %session.rgb_source,
            thermal = %session.thermal_source,
            model = %session.model,
            "test analysis started"
        );
        Ok(&*self.session.insert(session))
    }

    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.active) else {
            return false;
        };
        session.active = false;
        session.playback.playing = false;
        self.connection
            .send(OutboundMessage::StopTestStream(StopTestStream::default()));
        if let Err(err) = self.media.pause() {
            warn!(%err, "local playback did not pause");
        }
        self.overlay.clear();
        info!("test analysis stopped");
        true
    }

    /// Apply a playback gesture locally and, while active, mirror it to the backend.
    pub fn control(&mut self, action: PlaybackAction) -> Result<()> {
        let control = match action {
            PlaybackAction::Play => {
                self.media.play()?;
                TestVideoControl {
                    action: ControlAction::Play,
                    time: Some(self.media.current_time()),
                    rate: None,
                }
            }
            PlaybackAction::Pause => {
                self.media.pause()?;
                TestVideoControl {
                    action: ControlAction::Pause,
                    time: Some(self.media.current_time()),
                    rate: None,
                }
            }
            PlaybackAction::Seek(time) => {
                self.media.seek(time)?;
                TestVideoControl {
                    action: ControlAction::Seek,
                    time: Some(self.media.current_time()),
                    rate: None,
                }
            }
            PlaybackAction::SetRate(rate) => {
                self.media.set_rate(rate)?;
                TestVideoControl {
                    action: ControlAction::PlaybackRate,
                    time: None,
                    rate: Some(rate),
                }
            }
        };

        let Some(session) = self.session.as_mut().filter(|s| s.active) else {
            debug!(?action, "no active test session; control kept local");
            return Ok(());
        };
        session.playback.playing = self.media.is_playing();
        session.playback.rate = self.media.rate();
        if let Some(time) = control.time {
            session.playback.position = time;
        }
        self.connection
            .send(OutboundMessage::TestVideoControl(control));
        Ok(())
    }

    /// Take an annotated test frame. The backend's reported time and duration
    /// override the local view of the timeline.
    pub fn on_frame(&mut self, frame: VideoFrame) -> bool {
        if frame.camera_id != FrameTarget::TestVideo {
            return false;
        }
        let Some(session) = self.session.as_mut().filter(|s| s.active) else {
            debug!("test frame without an active session dropped");
            return false;
        };
        if let Some(rgb) = frame.rgb {
            self.overlay.rgb = Some(rgb);
        }
        if let Some(tir) = frame.tir {
            self.overlay.thermal = Some(tir);
        }
        if let Some(time) = frame.current_time {
            session.playback.position = time;
        }
        if let Some(duration) = frame.duration {
            session.playback.duration = duration;
        }
        true
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.media.advance(elapsed);
    }

    /// Drift check on the master clock; only meaningful while a session runs.
    pub fn on_timeupdate(&mut self) -> Option<SyncTick> {
        if !self.is_active() {
            return None;
        }
        let tick = self.media.on_timeupdate();
        if let Some(session) = self.session.as_mut() {
            session.playback.playing = self.media.is_playing();
        }
        Some(tick)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use bss_media::SimulatedMedia;
    use bss_network::{ConnectionManager, LocalConnector};
    use bss_types::{camera::CameraId, BssError};

    async fn controller() -> (
        LocalConnector,
        ConnectionManager,
        TestAnalysisController<SimulatedMedia>,
    ) {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        manager.connect(Some("token")).await.unwrap();
        let media = DualMediaSynchronizer::new(
            SimulatedMedia::new("rgb", 60.0),
            SimulatedMedia::new("tir", 60.0),
            0.5,
        );
        let controller = TestAnalysisController::new(manager.handle(), media);
        (connector, manager, controller)
    }

    fn selection() -> TestSelection {
        TestSelection::new("field_rgb.mp4", "field_tir.mp4", "yolo11n_early_fusion.pt")
    }

    fn test_frame(time: Option<f64>, duration: Option<f64>) -> VideoFrame {
        VideoFrame {
            camera_id: FrameTarget::TestVideo,
            rgb: Some(FrameImage::new(vec![9; 4])),
            tir: Some(FrameImage::new(vec![8; 2])),
            person_detected: false,
            current_time: time,
            duration,
        }
    }

    #[tokio::test]
    async fn incomplete_selection_sends_nothing() {
        let (connector, _manager, mut controller) = controller().await;
        let err = controller
            .start(TestSelection {
                rgb_source: Some("a.mp4".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BssError::Validation(_)));
        assert!(connector.sent().is_empty());
        assert!(controller.session().is_none());
    }

    #[tokio::test]
    async fn start_rewinds_and_requests_analysis() {
        let (connector, _manager, mut controller) = controller().await;
        controller.media_mut().seek(12.0).unwrap();

        let session = controller.start(selection()).unwrap();
        assert!(session.active);
        assert_eq!(session.playback.duration, 60.0);
        assert_eq!(controller.media().current_time(), 0.0);
        assert_eq!(
            connector.sent(),
            vec![OutboundMessage::StartTestStream(StartTestStream {
                rgb_filename: "field_rgb.mp4".into(),
                tir_filename: "field_tir.mp4".into(),
                model: "yolo11n_early_fusion.pt".into(),
            })]
        );
    }

    #[tokio::test]
    async fn playback_gestures_are_forwarded_while_active() {
        let (connector, _manager, mut controller) = controller().await;
        controller.start(selection()).unwrap();
        connector.take_sent();

        controller.control(PlaybackAction::Seek(12.5)).unwrap();
        controller.control(PlaybackAction::Play).unwrap();
        controller.control(PlaybackAction::SetRate(2.0)).unwrap();
        controller.control(PlaybackAction::Pause).unwrap();

        let sent = connector.sent();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::TestVideoControl(TestVideoControl {
                    action: ControlAction::Seek,
                    time: Some(12.5),
                    rate: None,
                }),
                OutboundMessage::TestVideoControl(TestVideoControl {
                    action: ControlAction::Play,
                    time: Some(12.5),
                    rate: None,
                }),
                OutboundMessage::TestVideoControl(TestVideoControl {
                    action: ControlAction::PlaybackRate,
                    time: None,
                    rate: Some(2.0),
                }),
                OutboundMessage::TestVideoControl(TestVideoControl {
                    action: ControlAction::Pause,
                    time: Some(12.5),
                    rate: None,
                }),
            ]
        );
        assert_eq!(controller.media().slave().rate(), 2.0);
    }

    #[tokio::test]
    async fn gestures_without_a_session_stay_local() {
        let (connector, _manager, mut controller) = controller().await;
        controller.control(PlaybackAction::Play).unwrap();
        assert!(controller.media().is_playing());
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn server_time_overrides_local_position() {
        let (_connector, _manager, mut controller) = controller().await;
        controller.start(selection()).unwrap();
        controller.control(PlaybackAction::Seek(3.0)).unwrap();

        assert!(controller.on_frame(test_frame(Some(4.2), Some(61.5))));
        let playback = controller.session().unwrap().playback;
        assert_eq!(playback.position, 4.2);
        assert_eq!(playback.duration, 61.5);
        assert_eq!(controller.overlay().rgb.as_ref().map(FrameImage::len), Some(4));
    }

    #[tokio::test]
    async fn live_frames_and_inactive_sessions_are_ignored() {
        let (_connector, _manager, mut controller) = controller().await;
        assert!(!controller.on_frame(test_frame(Some(1.0), None)));

        controller.start(selection()).unwrap();
        let mut live = test_frame(None, None);
        live.camera_id = FrameTarget::Camera(CameraId(1));
        assert!(!controller.on_frame(live));
        assert_eq!(controller.overlay(), &OverlayFrames::default());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (connector, _manager, mut controller) = controller().await;
        assert!(!controller.stop());
        controller.start(selection()).unwrap();
        connector.take_sent();

        assert!(controller.stop());
        assert!(!controller.stop());
        assert_eq!(
            connector.sent(),
            vec![OutboundMessage::StopTestStream(StopTestStream::default())]
        );
        assert!(!controller.is_active());
        assert!(!controller.on_frame(test_frame(Some(9.0), None)));
    }

    #[tokio::test]
    async fn timeupdate_corrects_thermal_drift_during_a_session() {
        let (_connector, _manager, mut controller) = controller().await;
        assert!(controller.on_timeupdate().is_none());

        controller.start(selection()).unwrap();
        controller.control(PlaybackAction::Play).unwrap();
        controller.advance(Duration::from_secs(5));
        controller.media_mut().slave_mut().seek(3.0).unwrap();

        let tick = controller.on_timeupdate().unwrap();
        assert!(tick.corrected);
        assert!((controller.media().slave().current_time() - 5.0).abs() < 1e-9);
    }
}
