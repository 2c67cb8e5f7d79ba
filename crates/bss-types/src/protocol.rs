//! Named events exchanged with the detection backend.
//!
//! Each message is an event name plus a JSON payload; the transport decides how
//! the pair is framed on the wire. Outbound commands are fire-and-forget; the
//! backend never acknowledges them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{
    camera::{CameraId, FrameImage},
    detection::DetectionEvent,
    BssError, Result,
};

/// Reserved `camera_id` used by the backend for test-mode analysis frames.
pub const TEST_VIDEO_TARGET: &str = "test_video";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    StartStream(StartStream),
    StopStream(StopStream),
    StartTestStream(StartTestStream),
    StopTestStream(StopTestStream),
    TestVideoControl(TestVideoControl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStream {
    pub camera_id: CameraId,
    /// Only privileged operators may pin the model; otherwise the backend uses its default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopStream {
    pub camera_id: CameraId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTestStream {
    pub rgb_filename: String,
    pub tir_filename: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopTestStream {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Play,
    Pause,
    Seek,
    PlaybackRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVideoControl {
    pub action: ControlAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundMessage::StartStream(_) => "start_stream",
            OutboundMessage::StopStream(_) => "stop_stream",
            OutboundMessage::StartTestStream(_) => "start_test_stream",
            OutboundMessage::StopTestStream(_) => "stop_test_stream",
            OutboundMessage::TestVideoControl(_) => "test_video_control",
        }
    }

    /// Split into the event name and its JSON payload.
    pub fn to_event(&self) -> Result<(&'static str, Value)> {
        let name = self.name();
        let mut envelope = serde_json::to_value(self)
            .map_err(|err| BssError::Protocol(format!("failed to encode {name}: {err}")))?;
        let data = envelope
            .get_mut("data")
            .map(Value::take)
            .unwrap_or_else(|| json!({}));
        Ok((name, data))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    Response(ServerMessage),
    VideoFrame(VideoFrame),
    NewEvent(DetectionEvent),
    Error(ServerMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub camera_id: FrameTarget,
    #[serde(default)]
    pub rgb: Option<FrameImage>,
    #[serde(default)]
    pub tir: Option<FrameImage>,
    #[serde(default)]
    pub person_detected: bool,
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Response(_) => MessageKind::Response,
            InboundMessage::VideoFrame(_) => MessageKind::VideoFrame,
            InboundMessage::NewEvent(_) => MessageKind::NewEvent,
            InboundMessage::Error(_) => MessageKind::Error,
        }
    }

    /// Rebuild a message from an event name and its payload.
    pub fn from_event(name: &str, data: Value) -> Result<Self> {
        serde_json::from_value(json!({ "event": name, "data": data }))
            .map_err(|err| BssError::Protocol(format!("undecodable `{name}` event: {err}")))
    }
}

/// Inbound message names a consumer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Response,
    VideoFrame,
    NewEvent,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Response => "response",
            MessageKind::VideoFrame => "video_frame",
            MessageKind::NewEvent => "new_event",
            MessageKind::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a `video_frame`: a live camera or the test-mode analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameTarget {
    Camera(CameraId),
    TestVideo,
    Other(String),
}

impl Serialize for FrameTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FrameTarget::Camera(id) => serializer.serialize_u32(id.0),
            FrameTarget::TestVideo => serializer.serialize_str(TEST_VIDEO_TARGET),
            FrameTarget::Other(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for FrameTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u32),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Id(id) => FrameTarget::Camera(CameraId(id)),
            Raw::Name(name) if name == TEST_VIDEO_TARGET => FrameTarget::TestVideo,
            Raw::Name(name) => FrameTarget::Other(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stream_omits_model_for_unprivileged_operator() {
        let msg = OutboundMessage::StartStream(StartStream {
            camera_id: CameraId(1),
            model: None,
            user_id: 4,
        });
        let (name, data) = msg.to_event().unwrap();
        assert_eq!(name, "start_stream");
        assert_eq!(data, json!({"camera_id": 1, "user_id": 4}));
    }

    #[test]
    fn stop_test_stream_has_empty_payload() {
        let (name, data) = OutboundMessage::StopTestStream(StopTestStream::default())
            .to_event()
            .unwrap();
        assert_eq!(name, "stop_test_stream");
        assert_eq!(data, json!({}));
    }

    #[test]
    fn playback_rate_control_encodes_rate_only() {
        let msg = OutboundMessage::TestVideoControl(TestVideoControl {
            action: ControlAction::PlaybackRate,
            time: None,
            rate: Some(1.5),
        });
        let (name, data) = msg.to_event().unwrap();
        assert_eq!(name, "test_video_control");
        assert_eq!(data, json!({"action": "playback_rate", "rate": 1.5}));
    }

    #[test]
    fn decodes_live_and_test_frames() {
        let live = InboundMessage::from_event(
            "video_frame",
            json!({"camera_id": 1, "rgb": "AAEC", "tir": "AwQF", "person_detected": true}),
        )
        .unwrap();
        let InboundMessage::VideoFrame(frame) = live else {
            panic!("expected video frame");
        };
        assert_eq!(frame.camera_id, FrameTarget::Camera(CameraId(1)));
        assert_eq!(frame.rgb.unwrap().as_bytes(), &[0, 1, 2]);
        assert!(frame.person_detected);

        let test = InboundMessage::from_event(
            "video_frame",
            json!({"camera_id": "test_video", "rgb": "AAEC", "current_time": 3.5, "duration": 60.0}),
        )
        .unwrap();
        let InboundMessage::VideoFrame(frame) = test else {
            panic!("expected video frame");
        };
        assert_eq!(frame.camera_id, FrameTarget::TestVideo);
        assert_eq!(frame.tir, None);
        assert_eq!(frame.current_time, Some(3.5));
        assert!(!frame.person_detected);
    }

    #[test]
    fn unknown_event_is_a_protocol_error() {
        let err = InboundMessage::from_event("telemetry", json!({})).unwrap_err();
        assert!(matches!(err, BssError::Protocol(_)));
    }

    #[test]
    fn message_kind_matches_wire_name() {
        let msg = InboundMessage::Error(ServerMessage {
            message: "model missing".into(),
        });
        assert_eq!(msg.kind(), MessageKind::Error);
        assert_eq!(msg.kind().as_str(), "error");
    }
}
