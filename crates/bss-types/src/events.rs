use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    camera::CameraId,
    detection::DetectionEvent,
    session::{PlaybackState, SessionMode},
};

/// High-level kinds of messages published on the dashboard bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Connection,
    Session,
    Frame,
    Feed,
    Notice,
}

/// Immutable envelope for UI consumers of the dashboard session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: DashboardPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DashboardPayload {
    Connection(ConnectionEvent),
    ModeChanged(SessionMode),
    LiveFrame(LiveFrameSummary),
    /// A person was detected on a live camera.
    Alarm(CameraId),
    TestFrame(TestFrameSummary),
    TestSession(TestSessionStatus),
    TestCatalog(TestCatalog),
    FeedUpdated(FeedSummary),
    Notice(Notice),
}

/// Transport lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ConnectError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFrameSummary {
    pub camera_id: CameraId,
    pub rgb_bytes: usize,
    pub thermal_bytes: usize,
    pub person_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFrameSummary {
    pub rgb_bytes: usize,
    pub thermal_bytes: usize,
    pub playback: PlaybackState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestSessionStatus {
    Started { rgb: String, thermal: String, model: String },
    Stopped,
}

/// Files and models offered for test analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCatalog {
    pub videos: Vec<String>,
    pub models: Vec<String>,
}

/// Snapshot of the event feed, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSummary {
    pub len: usize,
    pub entries: Vec<DetectionEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Transient, operator-visible message (server responses, validation and settings failures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

impl DashboardEvent {
    pub fn new(payload: DashboardPayload) -> Self {
        let kind = match &payload {
            DashboardPayload::Connection(_) => EventKind::Connection,
            DashboardPayload::ModeChanged(_)
            | DashboardPayload::TestSession(_)
            | DashboardPayload::TestCatalog(_) => EventKind::Session,
            DashboardPayload::LiveFrame(_)
            | DashboardPayload::Alarm(_)
            | DashboardPayload::TestFrame(_) => EventKind::Frame,
            DashboardPayload::FeedUpdated(_) => EventKind::Feed,
            DashboardPayload::Notice(_) => EventKind::Notice,
        };
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}
