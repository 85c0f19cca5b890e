use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::protocol::ToolKind;
use crate::registry::{Session, SessionStatus};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    base_url: Url,
}

impl ApiConfig {
    pub fn new(server_base_url: impl AsRef<str>) -> Result<Self, ApiError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(ApiError::InvalidConfig(
                "backend base url cannot be empty".into(),
            ));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{}", base);
        }
        let parsed = Url::parse(&base)
            .map_err(|err| ApiError::InvalidConfig(format!("invalid backend url: {err}")))?;
        Ok(Self { base_url: parsed })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Terminal channel endpoint for one session: `/ws?session_id=<id>`,
    /// with the scheme switched to ws(s).
    pub fn terminal_ws_url(&self, session_id: &str) -> Result<Url, ApiError> {
        let mut url = self.ws_base()?;
        url.set_path("/ws");
        url.set_query(Some(&format!("session_id={session_id}")));
        Ok(url)
    }

    /// Chat channel endpoint, one per UI instance: `/ws/chat`.
    pub fn chat_ws_url(&self) -> Result<Url, ApiError> {
        let mut url = self.ws_base()?;
        url.set_path("/ws/chat");
        url.set_query(None);
        Ok(url)
    }

    fn ws_base(&self) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| {
            ApiError::InvalidConfig(format!("cannot derive ws url from {}", self.base_url))
        })?;
        Ok(url)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub tool: ToolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub tool: ToolKind,
    pub created_at: u64,
    #[serde(default)]
    pub project_path: Option<String>,
}

impl CreatedSession {
    /// Status is optimistically `Running` at creation; the backend owns it
    /// from the first run-state frame onward.
    pub fn into_session(self) -> Session {
        Session {
            name: derive_name(self.tool, &self.session_id),
            id: self.session_id,
            tool: self.tool,
            status: SessionStatus::Running,
            command: self.tool.default_command().to_string(),
            cwd: self.project_path,
            created_at: self.created_at,
        }
    }
}

/// One row of `GET /api/sessions`. `status` is the backend's raw
/// running/exited vocabulary, not the richer UI status.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub tool: ToolKind,
    pub status: String,
    pub created_at: u64,
    #[serde(default)]
    pub project_path: Option<String>,
}

impl SessionSummary {
    pub fn session_status(&self) -> SessionStatus {
        match self.status.as_str() {
            "running" => SessionStatus::Running,
            "exited" => SessionStatus::Stopped,
            _ => SessionStatus::Idle,
        }
    }

    pub fn into_session(self) -> Session {
        Session {
            name: derive_name(self.tool, &self.session_id),
            status: self.session_status(),
            id: self.session_id,
            tool: self.tool,
            command: self.tool.default_command().to_string(),
            cwd: self.project_path,
            created_at: self.created_at,
        }
    }
}

fn derive_name(tool: ToolKind, session_id: &str) -> String {
    let short = session_id.get(..8).unwrap_or(session_id);
    format!("{tool}-{short}")
}

/// Thin client for the session CRUD boundary. Everything beyond these three
/// operations (jobs, tmux discovery, previews) belongs to other consumers
/// of the backend.
#[derive(Clone)]
pub struct SessionApi {
    config: Arc<ApiConfig>,
    backend: Arc<dyn ApiBackend>,
}

impl SessionApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let backend = Arc::new(ReqwestApiBackend::new()?);
        Ok(Self {
            config: Arc::new(config),
            backend,
        })
    }

    #[cfg(test)]
    fn with_backend(config: ApiConfig, backend: Arc<dyn ApiBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, ApiError> {
        self.backend.list_sessions(self.config.base_url()).await
    }

    pub async fn create(&self, request: CreateSessionRequest) -> Result<CreatedSession, ApiError> {
        self.backend
            .create_session(self.config.base_url(), &request)
            .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), ApiError> {
        self.backend
            .delete_session(self.config.base_url(), session_id)
            .await
    }
}

#[async_trait]
trait ApiBackend: Send + Sync {
    async fn list_sessions(&self, base_url: &Url) -> Result<Vec<SessionSummary>, ApiError>;

    async fn create_session(
        &self,
        base_url: &Url,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, ApiError>;

    async fn delete_session(&self, base_url: &Url, session_id: &str) -> Result<(), ApiError>;
}

struct ReqwestApiBackend {
    client: reqwest::Client,
}

impl ReqwestApiBackend {
    fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    fn sessions_endpoint(base_url: &Url) -> Result<Url, ApiError> {
        base_url.join("api/sessions").map_err(|err| {
            ApiError::InvalidConfig(format!("invalid sessions endpoint: {err}"))
        })
    }
}

#[async_trait]
impl ApiBackend for ReqwestApiBackend {
    async fn list_sessions(&self, base_url: &Url) -> Result<Vec<SessionSummary>, ApiError> {
        let endpoint = Self::sessions_endpoint(base_url)?;
        let response = self.client.get(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        let payload = response.json::<Vec<SessionSummary>>().await?;
        Ok(payload)
    }

    async fn create_session(
        &self,
        base_url: &Url,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, ApiError> {
        let endpoint = Self::sessions_endpoint(base_url)?;
        let response = self.client.post(endpoint).json(request).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        let payload = response.json::<CreatedSession>().await?;
        Ok(payload)
    }

    async fn delete_session(&self, base_url: &Url, session_id: &str) -> Result<(), ApiError> {
        let endpoint = base_url
            .join(&format!("api/sessions/{session_id}"))
            .map_err(|err| {
                ApiError::InvalidConfig(format!(
                    "invalid delete endpoint for session {session_id}: {err}"
                ))
            })?;
        let response = self.client.delete(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(())
    }
}
