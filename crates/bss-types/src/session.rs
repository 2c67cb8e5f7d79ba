use serde::{Deserialize, Serialize};

use crate::{BssError, Result};

/// Session-wide state of the stream controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    Idle,
    Live,
    Test,
    /// Stop commands have been issued and Live is waiting on a default-model fetch.
    Transitioning,
}

/// Modes an operator can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    Idle,
    Live,
    Test,
}

/// Dashboard views the operator can navigate between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum View {
    Root,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    #[serde(other)]
    Unknown,
}

/// Authenticated operator profile as returned by the profile endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl Operator {
    /// Admins may enter Test mode and pin the live detection model.
    pub fn is_privileged(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Operator's pending choice of files and model for a test analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    pub rgb_source: Option<String>,
    pub thermal_source: Option<String>,
    pub model: Option<String>,
}

impl TestSelection {
    pub fn new(
        rgb_source: impl Into<String>,
        thermal_source: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            rgb_source: Some(rgb_source.into()),
            thermal_source: Some(thermal_source.into()),
            model: Some(model.into()),
        }
    }

    /// Fill unset slots with the first available option of each list.
    pub fn with_defaults(mut self, videos: &[String], models: &[String]) -> Self {
        if self.rgb_source.is_none() {
            self.rgb_source = videos.first().cloned();
        }
        if self.thermal_source.is_none() {
            self.thermal_source = videos.get(1).or_else(|| videos.first()).cloned();
        }
        if self.model.is_none() {
            self.model = models.first().cloned();
        }
        self
    }

    /// Turn a complete selection into a session; any unset slot is a validation failure.
    pub fn into_session(self) -> Result<TestSession> {
        let mut missing = Vec::new();
        if blank(&self.rgb_source) {
            missing.push("RGB video");
        }
        if blank(&self.thermal_source) {
            missing.push("thermal video");
        }
        if blank(&self.model) {
            missing.push("model");
        }
        match (self.rgb_source, self.thermal_source, self.model) {
            (Some(rgb_source), Some(thermal_source), Some(model)) if missing.is_empty() => {
                Ok(TestSession {
                    rgb_source,
                    thermal_source,
                    model,
                    active: true,
                    playback: PlaybackState::default(),
                })
            }
            _ => Err(BssError::Validation(format!(
                "select {} before starting the analysis",
                missing.join(", ")
            ))),
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub position: f64,
    pub duration: f64,
    pub rate: f64,
    pub playing: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            position: 0.0,
            duration: 0.0,
            rate: 1.0,
            playing: false,
        }
    }
}

/// A fully specified test-mode analysis. At most one exists at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub rgb_source: String,
    pub thermal_source: String,
    pub model: String,
    pub active: bool,
    pub playback: PlaybackState,
}

/// Operator playback gestures on the master (RGB) element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek(f64),
    SetRate(f64),
}

/// Outcome of a default-model fetch, surfaced explicitly to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResolution {
    Resolved(String),
    Failed(String),
}
