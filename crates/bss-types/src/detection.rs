use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// A detection event persisted by the backend. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: i64,
    /// Server-formatted ISO-8601 timestamp; kept verbatim since it is part of the dedup key.
    pub timestamp: String,
    pub detected_object: String,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub camera_id: Option<u32>,
    #[serde(default = "not_available")]
    pub camera_name: String,
    #[serde(default = "not_available")]
    pub location: String,
    #[serde(default = "not_available")]
    pub user_name: String,
    #[serde(default, deserialize_with = "deserialize_optional_path")]
    pub video_path_rgb: Option<String>,
}

impl DetectionEvent {
    /// Duplicate deliveries share the `(id, timestamp)` pair.
    pub fn same_key(&self, other: &DetectionEvent) -> bool {
        self.id == other.id && self.timestamp == other.timestamp
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
    }

    /// Where the backend serves the RGB clip it recorded for this event.
    ///
    /// `api_base` may point at the server root or its `/api` prefix; clips live
    /// under `/event_recordings` at the root.
    pub fn recording_url(&self, api_base: &str) -> Option<String> {
        let path = self.video_path_rgb.as_deref()?.trim_start_matches('/');
        let base = api_base.trim_end_matches('/');
        let root = base.strip_suffix("/api").unwrap_or(base);
        Some(format!("{root}/event_recordings/{path}"))
    }

    pub fn object_class(&self) -> ObjectClass {
        ObjectClass::from_label(&self.detected_object)
    }

    pub fn confidence_band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }
}

/// Detection classes the backend models are trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Person,
    /// Wild boar (`scrofa`).
    WildBoar,
    /// Water deer (`inermis`).
    WaterDeer,
    Other,
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" => ObjectClass::Person,
            "scrofa" => ObjectClass::WildBoar,
            "inermis" => ObjectClass::WaterDeer,
            _ => ObjectClass::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
    Critical,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f32) -> Self {
        let percent = confidence * 100.0;
        if percent >= 90.0 {
            ConfidenceBand::Critical
        } else if percent >= 80.0 {
            ConfidenceBand::High
        } else if percent >= 50.0 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

fn not_available() -> String {
    "N/A".to_string()
}

/// The backend formats confidence as a decimal string ("0.87"); older builds send a number.
fn deserialize_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| de::Error::custom(format!("invalid confidence '{text}': {err}")))?,
    };
    if !value.is_finite() {
        return Err(de::Error::custom("confidence must be finite"));
    }
    Ok(value.clamp(0.0, 1.0) as f32)
}

fn deserialize_optional_path<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|path| !path.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json(confidence: &str) -> String {
        format!(
            r#"{{"id": 7, "timestamp": "2025-08-01T10:15:00.123456Z", "detected_object": "scrofa",
                "confidence": {confidence}, "camera_id": 1, "camera_name": "Gate",
                "location": "North", "user_name": "Kim", "video_path_rgb": ""}}"#
        )
    }

    #[test]
    fn parses_string_confidence() {
        let event: DetectionEvent = serde_json::from_str(&sample_json("\"0.87\"")).unwrap();
        assert!((event.confidence - 0.87).abs() < 1e-6);
        assert_eq!(event.object_class(), ObjectClass::WildBoar);
        assert_eq!(event.confidence_band(), ConfidenceBand::High);
        assert_eq!(event.video_path_rgb, None);
        assert!(event.occurred_at().is_some());
    }

    #[test]
    fn clamps_numeric_confidence() {
        let event: DetectionEvent = serde_json::from_str(&sample_json("1.4")).unwrap();
        assert_eq!(event.confidence, 1.0);
        assert_eq!(event.confidence_band(), ConfidenceBand::Critical);
    }

    #[test]
    fn missing_optional_fields_default() {
        let event: DetectionEvent = serde_json::from_str(
            r#"{"id": 1, "timestamp": "t", "detected_object": "person", "confidence": 0.4}"#,
        )
        .unwrap();
        assert_eq!(event.camera_name, "N/A");
        assert_eq!(event.camera_id, None);
        assert_eq!(event.confidence_band(), ConfidenceBand::Low);
    }

    #[test]
    fn recording_url_is_served_from_the_server_root() {
        let mut event: DetectionEvent = serde_json::from_str(&sample_json("0.5")).unwrap();
        assert_eq!(event.recording_url("http://localhost:5000"), None);

        event.video_path_rgb = Some("2025/08/01/gate_101500.mp4".into());
        assert_eq!(
            event.recording_url("http://localhost:5000/api/").as_deref(),
            Some("http://localhost:5000/event_recordings/2025/08/01/gate_101500.mp4")
        );
        assert_eq!(
            event.recording_url("https://bss.example").as_deref(),
            Some("https://bss.example/event_recordings/2025/08/01/gate_101500.mp4")
        );
    }

    #[test]
    fn key_compares_id_and_timestamp() {
        let a: DetectionEvent = serde_json::from_str(&sample_json("0.5")).unwrap();
        let mut b = a.clone();
        assert!(a.same_key(&b));
        b.timestamp = "2025-08-01T10:15:01Z".into();
        assert!(!a.same_key(&b));
    }
}
