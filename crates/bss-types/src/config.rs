use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{camera::CameraId, BssError, Result};

/// Model name the backend ships as its default detector.
pub const DEFAULT_FALLBACK_MODEL: &str = "yolo11n_early_fusion.pt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub api_url: String,
    pub ws_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

/// What to do when the default model cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFailurePolicy {
    /// Stream with `fallback_model` and tell the operator.
    #[default]
    Degrade,
    /// Stay idle until the operator retries.
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    pub camera_ids: Vec<CameraId>,
    pub fallback_model: String,
    #[serde(default)]
    pub on_model_failure: ModelFailurePolicy,
    pub live_feed_capacity: usize,
    pub initial_feed_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub drift_epsilon_secs: f64,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub notice_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub backend: BackendConfig,
    pub dashboard: DashboardSettings,
    pub media: MediaConfig,
    pub ops: OpsConfig,
}

impl DashboardConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            BssError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            BssError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.api_url.trim().is_empty() {
            return Err(BssError::Configuration(
                "backend.api_url must not be empty".into(),
            ));
        }
        if !(self.backend.ws_url.starts_with("ws://") || self.backend.ws_url.starts_with("wss://"))
        {
            return Err(BssError::Configuration(
                "backend.ws_url must use the ws:// or wss:// scheme".into(),
            ));
        }
        if self.backend.request_timeout_ms == 0 {
            return Err(BssError::Configuration(
                "backend.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.dashboard.camera_ids.is_empty() {
            return Err(BssError::Configuration(
                "dashboard.camera_ids must list at least one camera".into(),
            ));
        }
        let mut ids = self.dashboard.camera_ids.clone();
        ids.sort();
        ids.dedup();
        if ids.len() != self.dashboard.camera_ids.len() {
            return Err(BssError::Configuration(
                "dashboard.camera_ids must not contain duplicates".into(),
            ));
        }
        if self.dashboard.fallback_model.trim().is_empty() {
            return Err(BssError::Configuration(
                "dashboard.fallback_model must not be empty".into(),
            ));
        }
        if self.dashboard.live_feed_capacity == 0 || self.dashboard.initial_feed_capacity == 0 {
            return Err(BssError::Configuration(
                "dashboard feed capacities must be greater than zero".into(),
            ));
        }
        if !(0.3..=0.5).contains(&self.media.drift_epsilon_secs) {
            return Err(BssError::Configuration(
                "media.drift_epsilon_secs must be between 0.3 and 0.5".into(),
            ));
        }
        if self.media.tick_interval_ms == 0 {
            return Err(BssError::Configuration(
                "media.tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.ops.notice_capacity == 0 {
            return Err(BssError::Configuration(
                "ops.notice_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                api_url: "http://localhost:5000".into(),
                ws_url: "ws://localhost:5000".into(),
                auth_token: None,
                request_timeout_ms: 10_000,
            },
            dashboard: DashboardSettings {
                camera_ids: vec![CameraId(1)],
                fallback_model: DEFAULT_FALLBACK_MODEL.into(),
                on_model_failure: ModelFailurePolicy::Degrade,
                live_feed_capacity: 20,
                initial_feed_capacity: 50,
            },
            media: MediaConfig {
                drift_epsilon_secs: 0.5,
                tick_interval_ms: 250,
            },
            ops: OpsConfig {
                log_level: "info".into(),
                notice_capacity: 32,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_dashboard_config_from_file() {
        let temp_path = std::env::temp_dir().join("bss-config-test.toml");
        let mut config = DashboardConfig::default();
        config.backend.auth_token = Some("token".into());
        config.dashboard.camera_ids = vec![CameraId(1), CameraId(2)];
        config.dashboard.on_model_failure = ModelFailurePolicy::Block;
        config.media.drift_epsilon_secs = 0.3;

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = DashboardConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.dashboard.camera_ids, config.dashboard.camera_ids);
        assert_eq!(loaded.dashboard.on_model_failure, ModelFailurePolicy::Block);
        assert_eq!(loaded.backend.auth_token.as_deref(), Some("token"));
        assert!((loaded.media.drift_epsilon_secs - 0.3).abs() < f64::EPSILON);
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = DashboardConfig::from_file("/nonexistent/bss.toml").unwrap_err();
        assert!(matches!(err, BssError::Configuration(_)));
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = DashboardConfig::default();
        assert!(config.validate().is_ok());

        config.backend.ws_url = "http://localhost:5000".into();
        assert!(config.validate().is_err());
        config.backend.ws_url = "ws://localhost:5000".into();

        config.dashboard.camera_ids = vec![];
        assert!(config.validate().is_err());
        config.dashboard.camera_ids = vec![CameraId(1), CameraId(1)];
        assert!(config.validate().is_err());
        config.dashboard.camera_ids = vec![CameraId(1)];

        config.media.drift_epsilon_secs = 0.9;
        assert!(config.validate().is_err());
        config.media.drift_epsilon_secs = 0.4;

        config.dashboard.live_feed_capacity = 0;
        assert!(config.validate().is_err());
        config.dashboard.live_feed_capacity = 20;

        config.ops.notice_capacity = 0;
        assert!(config.validate().is_err());
        config.ops.notice_capacity = 8;
        assert!(config.validate().is_ok());
    }
}
