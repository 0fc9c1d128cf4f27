//! The remote service surface the engine consumes, and its HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::operation::SyncOperation;

/// Timeout for the reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Server-side collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Moods,
    Journal,
    Rituals,
    Completions,
    Sessions,
}

impl Collection {
    pub fn path(&self) -> &'static str {
        match self {
            Collection::Moods => "moods",
            Collection::Journal => "journal",
            Collection::Rituals => "rituals",
            Collection::Completions => "completions",
            Collection::Sessions => "sessions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Non-CRUD actions on a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteAction {
    Archive,
    Favorite,
    Complete,
}

impl RemoteAction {
    pub fn path(&self) -> &'static str {
        match self {
            RemoteAction::Archive => "archive",
            RemoteAction::Favorite => "favorite",
            RemoteAction::Complete => "complete",
        }
    }
}

/// Errors from the remote service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote service is not reachable")]
    Offline,

    #[error("not authorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("server returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The operation cannot be sent yet, e.g. it depends on a record the
    /// server has not accepted.
    #[error("cannot replay operation: {0}")]
    Unresolved(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound)
    }
}

/// A per-operation failure in a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: Uuid,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchFailure {
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Per-operation results of a batch submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    #[serde(default)]
    pub succeeded: Vec<Uuid>,
    #[serde(default)]
    pub failed: Vec<BatchFailure>,
}

/// The remote service.
///
/// Every call is a separate suspension point; the engine bounds each one with
/// its own timeout.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Submits operations in order and returns per-operation results.
    async fn submit_batch(&self, operations: &[SyncOperation]) -> Result<BatchOutcome, RemoteError>;

    /// Fetches up to `limit` records of a collection.
    async fn fetch(
        &self,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, RemoteError>;

    /// Creates a record and returns the server's copy.
    async fn create(
        &self,
        collection: Collection,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    async fn update(
        &self,
        collection: Collection,
        server_id: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    async fn delete(&self, collection: Collection, server_id: &str) -> Result<(), RemoteError>;

    /// Runs an action on a record (archive, favorite, complete).
    async fn action(
        &self,
        collection: Collection,
        server_id: &str,
        action: RemoteAction,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;
}

/// Wire shape of one batched operation.
#[derive(Debug, Serialize)]
struct BatchItem<'a> {
    id: Uuid,
    entity: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    local_id: &'a str,
    server_id: Option<&'a str>,
    data: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// HTTP client for the Stillwell API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: server_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.base_url
    }

    /// Builds an API URL from the configured server URL.
    ///
    /// Accepts bare hosts (`localhost:8080`) as well as full URLs.
    pub fn build_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        format!("{}/api/{}", base, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else {
                    RemoteError::Transport(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200..=299 => Ok(response),
            401 | 403 => Err(RemoteError::Unauthorized),
            404 => Err(RemoteError::NotFound),
            code => Err(RemoteError::Status(code)),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn submit_batch(&self, operations: &[SyncOperation]) -> Result<BatchOutcome, RemoteError> {
        let items: Vec<BatchItem<'_>> = operations
            .iter()
            .map(|op| BatchItem {
                id: op.id,
                entity: op.entity().as_str(),
                kind: op.op.type_name(),
                local_id: &op.local_id,
                server_id: op.server_id.as_deref(),
                data: &op.data,
            })
            .collect();

        let url = self.build_url("sync/batch");
        let response = self
            .send(self.client.post(url).json(&serde_json::json!({ "operations": items })))
            .await?;
        Self::json(response).await
    }

    async fn fetch(
        &self,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, RemoteError> {
        let url = self.build_url(collection.path());
        let response = self
            .send(self.client.get(url).query(&[("limit", limit)]))
            .await?;
        let body: FetchResponse = Self::json(response).await?;
        Ok(body.items)
    }

    async fn create(
        &self,
        collection: Collection,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.build_url(collection.path());
        let response = self.send(self.client.post(url).json(&body)).await?;
        Self::json(response).await
    }

    async fn update(
        &self,
        collection: Collection,
        server_id: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.build_url(&format!("{}/{}", collection.path(), server_id));
        let response = self.send(self.client.put(url).json(&body)).await?;
        Self::json(response).await
    }

    async fn delete(&self, collection: Collection, server_id: &str) -> Result<(), RemoteError> {
        let url = self.build_url(&format!("{}/{}", collection.path(), server_id));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn action(
        &self,
        collection: Collection,
        server_id: &str,
        action: RemoteAction,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = self.build_url(&format!(
            "{}/{}/{}",
            collection.path(),
            server_id,
            action.path()
        ));
        let response = self.send(self.client.post(url).json(&body)).await?;
        Self::json(response).await
    }
}

/// Checks whether the server answers its health endpoint.
pub async fn check_server(server_url: &str) -> bool {
    let base = server_url.trim_end_matches('/');
    let url = if base.starts_with("http://") || base.starts_with("https://") {
        format!("{}/health", base)
    } else {
        format!("http://{}/health", base)
    };

    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };

    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
