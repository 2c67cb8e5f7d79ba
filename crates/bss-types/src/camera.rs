use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine as _};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Numeric identifier of a configured live camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CameraId {
    fn from(value: u32) -> Self {
        CameraId(value)
    }
}

/// A single encoded image (JPEG bytes) delivered for one channel.
///
/// On the wire the image travels as base64 text; it is decoded once at the
/// protocol boundary.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameImage(Vec<u8>);

impl FrameImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_base64(text: &str) -> Result<Self, base64::DecodeError> {
        BASE64_ENGINE.decode(text.trim()).map(Self)
    }

    pub fn to_base64(&self) -> String {
        BASE64_ENGINE.encode(&self.0)
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameImage({} bytes)", self.0.len())
    }
}

impl Serialize for FrameImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for FrameImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        FrameImage::from_base64(&text).map_err(de::Error::custom)
    }
}

/// Per-camera live channel state, created at Live entry and cleared at exit.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraChannel {
    pub id: CameraId,
    pub rgb_frame: Option<FrameImage>,
    pub thermal_frame: Option<FrameImage>,
    /// True only between a sent `start_stream` and the next sent `stop_stream`.
    pub streaming: bool,
    pub person_detected: bool,
}

impl CameraChannel {
    pub fn new(id: CameraId) -> Self {
        Self {
            id,
            rgb_frame: None,
            thermal_frame: None,
            streaming: false,
            person_detected: false,
        }
    }

    pub fn has_frames(&self) -> bool {
        self.rgb_frame.is_some() || self.thermal_frame.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_image_decodes_base64_from_json() {
        let image: FrameImage = serde_json::from_str("\"/9j/4AAQ\"").expect("decode");
        assert_eq!(image.as_bytes(), &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10]);
        assert_eq!(image.to_base64(), "/9j/4AAQ");
    }

    #[test]
    fn frame_image_rejects_invalid_base64() {
        let result: Result<FrameImage, _> = serde_json::from_str("\"not base64!\"");
        assert!(result.is_err());
    }
}
