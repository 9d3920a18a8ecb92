//! Loading and saving the canvas document.
//!
//! The backend stores one canvas per project:
//! ```text
//! GET  {api}/editor/{project_id}/state   → {"canvas": [...]}      (404 = no state yet)
//! POST {api}/editor/{project_id}/state   ← {"id": ..., "canvas": [...]}
//! ```
//! Saves replace the whole document. Failures are reported to the caller,
//! which keeps editing locally and retries on the next commit.

use async_trait::async_trait;
use ovio_canvas::{PlacedComponent, ProjectId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::identity::Identity;
use crate::protocol::CanvasState;

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(Vec<PlacedComponent>),
    /// The server has no state for this project yet.
    NotFound,
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// Transport failure (DNS, refused, timeout, ...)
    Network(String),
    /// Non-success HTTP status other than 404 on load
    Status(u16),
    /// Response body did not match the expected shape
    Decode(String),
    /// Missing or rejected bearer token
    Unauthorized,
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Network(e) => write!(f, "Network error: {e}"),
            PersistenceError::Status(code) => write!(f, "Server responded with status {code}"),
            PersistenceError::Decode(e) => write!(f, "Unexpected response body: {e}"),
            PersistenceError::Unauthorized => write!(f, "Not authorized"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<reqwest::Error> for PersistenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PersistenceError::Decode(e.to_string())
        } else {
            PersistenceError::Network(e.to_string())
        }
    }
}

/// Durable home of canvas documents.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self, project_id: &ProjectId) -> Result<LoadOutcome, PersistenceError>;

    async fn save_state(
        &self,
        project_id: &ProjectId,
        canvas: &[PlacedComponent],
    ) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct SaveBody<'a> {
    id: &'a ProjectId,
    canvas: &'a [PlacedComponent],
}

/// REST-backed store.
pub struct HttpStateStore {
    client: reqwest::Client,
    api_url: String,
    identity: Identity,
}

impl HttpStateStore {
    pub fn new(api_url: impl Into<String>, identity: Identity, timeout: Duration) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url, identity))
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>, identity: Identity) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url, identity }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn state_url(&self, project_id: &ProjectId) -> String {
        format!("{}/editor/{}/state", self.api_url, project_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.identity.bearer() {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn load_state(&self, project_id: &ProjectId) -> Result<LoadOutcome, PersistenceError> {
        let response = self
            .authorize(self.client.get(self.state_url(project_id)))
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => {
                log::info!("No stored state for project {project_id}");
                Ok(LoadOutcome::NotFound)
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(PersistenceError::Unauthorized)
            }
            status if status.is_success() => {
                let state: CanvasState = response.json().await?;
                log::info!("Loaded {} components for project {project_id}", state.canvas.len());
                Ok(LoadOutcome::Loaded(state.canvas))
            }
            status => Err(PersistenceError::Status(status.as_u16())),
        }
    }

    async fn save_state(
        &self,
        project_id: &ProjectId,
        canvas: &[PlacedComponent],
    ) -> Result<(), PersistenceError> {
        let body = SaveBody { id: project_id, canvas };
        let response = self
            .authorize(self.client.post(self.state_url(project_id)))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(PersistenceError::Unauthorized)
            }
            status if status.is_success() => {
                log::debug!("Saved {} components for project {project_id}", canvas.len());
                Ok(())
            }
            status => Err(PersistenceError::Status(status.as_u16())),
        }
    }
}

/// In-process store for offline sessions and tests.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<ProjectId, Vec<PlacedComponent>>>,
    saves: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project's stored canvas.
    pub async fn insert(&self, project_id: ProjectId, canvas: Vec<PlacedComponent>) {
        self.states.write().await.insert(project_id, canvas);
    }

    pub async fn get(&self, project_id: &ProjectId) -> Option<Vec<PlacedComponent>> {
        self.states.read().await.get(project_id).cloned()
    }

    /// Number of saves accepted so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self, project_id: &ProjectId) -> Result<LoadOutcome, PersistenceError> {
        Ok(match self.states.read().await.get(project_id) {
            Some(canvas) => LoadOutcome::Loaded(canvas.clone()),
            None => LoadOutcome::NotFound,
        })
    }

    async fn save_state(
        &self,
        project_id: &ProjectId,
        canvas: &[PlacedComponent],
    ) -> Result<(), PersistenceError> {
        self.states.write().await.insert(project_id.clone(), canvas.to_vec());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
