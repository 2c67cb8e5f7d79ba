//! REST collaborators consumed by the dashboard core.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bss_types::{detection::DetectionEvent, session::Operator, BssError, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPage {
    pub page: u32,
    pub per_page: u32,
}

impl EventPage {
    pub fn first(per_page: u32) -> Self {
        Self { page: 1, per_page }
    }
}

#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn profile(&self) -> Result<Operator>;
    async fn default_model(&self) -> Result<String>;
    async fn set_default_model(&self, model: &str) -> Result<()>;
    /// Newest-first page of persisted detection events.
    async fn events(&self, page: EventPage) -> Result<Vec<DetectionEvent>>;
    async fn models(&self) -> Result<Vec<String>>;
    async fn test_videos(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct DefaultModelBody {
    default_model: String,
}

#[derive(Debug, Serialize)]
struct SetDefaultModelBody<'a> {
    model: &'a str,
}

/// Bearer-authenticated HTTP client for the backend REST API.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|err| BssError::Configuration(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(path, "GET");
        let response = self
            .authorize(self.http.get(self.url(path)).query(query))
            .send()
            .await
            .map_err(|err| BssError::Api(format!("GET {path} failed: {err}")))?
            .error_for_status()
            .map_err(|err| BssError::Api(format!("GET {path} rejected: {err}")))?;
        response
            .json::<T>()
            .await
            .map_err(|err| BssError::Api(format!("GET {path} returned malformed body: {err}")))
    }
}

#[async_trait]
impl DashboardApi for HttpApi {
    async fn profile(&self) -> Result<Operator> {
        self.get_json("/api/auth/profile", &[]).await
    }

    async fn default_model(&self) -> Result<String> {
        let body: DefaultModelBody = self
            .get_json("/api/default-model", &[])
            .await
            .map_err(|err| BssError::Settings(err.to_string()))?;
        Ok(body.default_model)
    }

    async fn set_default_model(&self, model: &str) -> Result<()> {
        debug!(model, "POST /api/default-model");
        self.authorize(self.http.post(self.url("/api/default-model")))
            .json(&SetDefaultModelBody { model })
            .send()
            .await
            .map_err(|err| BssError::Settings(format!("set default model failed: {err}")))?
            .error_for_status()
            .map_err(|err| BssError::Settings(format!("set default model rejected: {err}")))?;
        Ok(())
    }

    /// The page parameters are advisory: the current backend ignores them and
    /// always answers with its newest 20 events.
    async fn events(&self, page: EventPage) -> Result<Vec<DetectionEvent>> {
        self.get_json(
            "/api/events",
            &[
                ("page", page.page.to_string()),
                ("per_page", page.per_page.to_string()),
            ],
        )
        .await
    }

    async fn models(&self) -> Result<Vec<String>> {
        self.get_json("/api/models", &[]).await
    }

    async fn test_videos(&self) -> Result<Vec<String>> {
        self.get_json("/api/test_videos", &[]).await
    }
}

struct MemoryState {
    operator: Operator,
    profile_unavailable: bool,
    default_model: String,
    default_model_unavailable: bool,
    default_model_fetches: usize,
    events: Vec<DetectionEvent>,
    models: Vec<String>,
    test_videos: Vec<String>,
}

/// In-memory backend settings store; the admin panel is modelled by
/// [`DashboardApi::set_default_model`].
#[derive(Clone)]
pub struct MemoryApi {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryApi {
    pub fn new(operator: Operator, default_model: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                operator,
                profile_unavailable: false,
                default_model: default_model.into(),
                default_model_unavailable: false,
                default_model_fetches: 0,
                events: Vec::new(),
                models: Vec::new(),
                test_videos: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_events(self, events: Vec<DetectionEvent>) -> Self {
        self.lock().events = events;
        self
    }

    pub fn with_catalog(self, models: Vec<String>, test_videos: Vec<String>) -> Self {
        {
            let mut state = self.lock();
            state.models = models;
            state.test_videos = test_videos;
        }
        self
    }

    /// Make profile fetches fail until reset, as during an auth service outage.
    pub fn set_profile_unavailable(&self, unavailable: bool) {
        self.lock().profile_unavailable = unavailable;
    }

    /// Make default-model fetches fail until reset.
    pub fn set_default_model_unavailable(&self, unavailable: bool) {
        self.lock().default_model_unavailable = unavailable;
    }

    pub fn default_model_fetches(&self) -> usize {
        self.lock().default_model_fetches
    }

    /// Prepend a persisted event, as the backend does when it records a detection.
    pub fn record_event(&self, event: DetectionEvent) {
        self.lock().events.insert(0, event);
    }
}

#[async_trait]
impl DashboardApi for MemoryApi {
    async fn profile(&self) -> Result<Operator> {
        let state = self.lock();
        if state.profile_unavailable {
            return Err(BssError::Api("GET /api/auth/profile rejected: HTTP 503".into()));
        }
        Ok(state.operator.clone())
    }

    async fn default_model(&self) -> Result<String> {
        let mut state = self.lock();
        state.default_model_fetches += 1;
        if state.default_model_unavailable {
            return Err(BssError::Settings("default model unavailable".into()));
        }
        Ok(state.default_model.clone())
    }

    async fn set_default_model(&self, model: &str) -> Result<()> {
        if model.trim().is_empty() {
            return Err(BssError::Settings("model name is required".into()));
        }
        self.lock().default_model = model.to_string();
        Ok(())
    }

    async fn events(&self, page: EventPage) -> Result<Vec<DetectionEvent>> {
        let state = self.lock();
        let per_page = page.per_page.max(1) as usize;
        let start = (page.page.max(1) as usize - 1) * per_page;
        Ok(state.events.iter().skip(start).take(per_page).cloned().collect())
    }

    async fn models(&self) -> Result<Vec<String>> {
        Ok(self.lock().models.clone())
    }

    async fn test_videos(&self) -> Result<Vec<String>> {
        Ok(self.lock().test_videos.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bss_types::session::Role;

    fn admin() -> Operator {
        Operator {
            id: 1,
            username: "admin".into(),
            role: Role::Admin,
        }
    }

    fn event(id: i64) -> DetectionEvent {
        DetectionEvent {
            id,
            timestamp: format!("2025-08-01T10:00:{id:02}Z"),
            detected_object: "person".into(),
            confidence: 0.9,
            camera_id: Some(1),
            camera_name: "Gate".into(),
            location: "North".into(),
            user_name: "Kim".into(),
            video_path_rgb: None,
        }
    }

    #[tokio::test]
    async fn memory_api_tracks_default_model_changes() {
        let api = MemoryApi::new(admin(), "modelA.pt");
        assert_eq!(api.default_model().await.unwrap(), "modelA.pt");
        api.set_default_model("modelB.pt").await.unwrap();
        assert_eq!(api.default_model().await.unwrap(), "modelB.pt");
        assert_eq!(api.default_model_fetches(), 2);

        api.set_default_model_unavailable(true);
        assert!(matches!(
            api.default_model().await,
            Err(BssError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn memory_api_pages_events() {
        let api = MemoryApi::new(admin(), "m.pt").with_events((0..5).map(event).collect());
        let first = api.events(EventPage::first(2)).await.unwrap();
        assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 1]);
        let third = api
            .events(EventPage {
                page: 3,
                per_page: 2,
            })
            .await
            .unwrap();
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn http_api_normalises_base_url() {
        let api = HttpApi::new("http://localhost:5000/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(api.url("/api/models"), "http://localhost:5000/api/models");
    }
}
