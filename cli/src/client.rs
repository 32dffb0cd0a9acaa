//! HTTP client for depot (and LXD-compatible) daemons.
//!
//! The copy coordinator only sees the [`DaemonClient`] trait, so it can be
//! driven against an in-memory daemon in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use depot_core::container::{
    split_snapshot, ContainerCreateRequest, ContainerState, MigrationSourceRequest,
};
use depot_core::error::{DepotError, Result};
use depot_core::{ApiResponse, ResponseType, API_VERSION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{Remote, RemotesConfig};

/// A source daemon's migration operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSource {
    /// Operation URL, e.g. `/1.0/operations/<uuid>`
    pub operation: String,
    /// Websocket channel name to secret
    pub secrets: HashMap<String, String>,
}

/// Operations the copy coordinator needs from a daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Current state of a container.
    async fn container_state(&self, name: &str) -> Result<ContainerState>;

    /// Clone `source` into `name` on this daemon. Returns the operation URL.
    async fn local_copy(
        &self,
        source: &str,
        name: &str,
        config: HashMap<String, String>,
        profiles: Vec<String>,
    ) -> Result<String>;

    /// Names of the profiles defined on this daemon.
    async fn list_profiles(&self) -> Result<Vec<String>>;

    /// Ask this daemon to serve `name` over a migration websocket.
    async fn migration_source(&self, name: &str) -> Result<MigrationSource>;

    /// Addresses this daemon advertises to peers.
    async fn addresses(&self) -> Result<Vec<String>>;

    /// Create a container by pulling it from a source daemon.
    /// Returns the operation URL.
    async fn migrate_from(&self, request: ContainerCreateRequest) -> Result<String>;

    /// Block until the operation finishes; error unless it succeeded.
    async fn wait_for_success(&self, operation: &str) -> Result<()>;
}

/// Hands out a client per configured remote.
pub trait Connector: Send + Sync {
    fn connect(&self, remote: &str) -> Result<Arc<dyn DaemonClient>>;
}

/// Connects to remotes named in a [`RemotesConfig`].
pub struct RemoteConnector {
    config: RemotesConfig,
}

impl RemoteConnector {
    pub fn new(config: RemotesConfig) -> Self {
        Self { config }
    }
}

impl Connector for RemoteConnector {
    fn connect(&self, remote: &str) -> Result<Arc<dyn DaemonClient>> {
        let target = self.config.remote(remote)?;
        Ok(Arc::new(HttpClient::new(remote, target)?))
    }
}

/// API path of a container or `container/snapshot`.
pub fn container_path(name: &str) -> String {
    match split_snapshot(name) {
        Some((container, snapshot)) => format!(
            "/{}/containers/{}/snapshots/{}",
            API_VERSION, container, snapshot
        ),
        None => format!("/{}/containers/{}", API_VERSION, name),
    }
}

/// Websocket URL a destination dials to reach a source operation.
pub fn websocket_url(addr: &str, operation: &str) -> String {
    format!(
        "wss://{}/{}/websocket",
        addr.trim_end_matches('/'),
        operation.trim_matches('/')
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OperationState {
    status: String,
    status_code: u16,
    err: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerEnvironment {
    addresses: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerInfo {
    environment: ServerEnvironment,
}

/// Daemon client over the REST API.
pub struct HttpClient {
    remote: String,
    base: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(name: &str, remote: &Remote) -> Result<Self> {
        let base = Url::parse(&remote.addr).map_err(|e| {
            DepotError::Config(format!("invalid address for remote {}: {}", name, e))
        })?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("depot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DepotError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            remote: name.to_string(),
            base,
            token: remote.token.clone(),
            http,
        })
    }

    fn remote_error(&self, message: impl Into<String>) -> DepotError {
        DepotError::Remote {
            remote: self.remote.clone(),
            message: message.into(),
        }
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse> {
        let url = self
            .base
            .join(path)
            .map_err(|e| self.remote_error(format!("invalid path {}: {}", path, e)))?;
        tracing::debug!(remote = %self.remote, method = %method, url = %url, "Daemon request");

        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;
        let envelope: ApiResponse = response
            .json()
            .await
            .map_err(|e| self.remote_error(format!("invalid response: {}", e)))?;
        decode_envelope(&self.remote, envelope)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request::<()>(Method::GET, path, None).await?;
        Ok(serde_json::from_value(response.metadata)?)
    }

    async fn post_async<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        if response.response_type != ResponseType::Async || response.operation.is_empty() {
            return Err(self.remote_error(format!("expected an operation from POST {}", path)));
        }
        Ok(response)
    }
}

/// Turn an error envelope into an error.
fn decode_envelope(remote: &str, envelope: ApiResponse) -> Result<ApiResponse> {
    if envelope.response_type != ResponseType::Error {
        return Ok(envelope);
    }
    if envelope.error_code == 404 {
        return Err(DepotError::NotFound(envelope.error));
    }
    Err(DepotError::Remote {
        remote: remote.to_string(),
        message: envelope.error,
    })
}

/// Last path segment of each profile URL.
fn profile_names(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .filter_map(|url| url.rsplit('/').next().map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl DaemonClient for HttpClient {
    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        self.get(&container_path(name)).await
    }

    async fn local_copy(
        &self,
        source: &str,
        name: &str,
        config: HashMap<String, String>,
        profiles: Vec<String>,
    ) -> Result<String> {
        let body = ContainerCreateRequest::local_copy(name, source, config, profiles);
        let path = format!("/{}/containers", API_VERSION);
        Ok(self.post_async(&path, &body).await?.operation)
    }

    async fn list_profiles(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = self.get(&format!("/{}/profiles", API_VERSION)).await?;
        Ok(profile_names(urls))
    }

    async fn migration_source(&self, name: &str) -> Result<MigrationSource> {
        let body = MigrationSourceRequest { migration: true };
        let response = self.post_async(&container_path(name), &body).await?;
        let secrets: HashMap<String, String> = serde_json::from_value(response.metadata)
            .map_err(|e| self.remote_error(format!("invalid migration secrets: {}", e)))?;
        Ok(MigrationSource {
            operation: response.operation,
            secrets,
        })
    }

    async fn addresses(&self) -> Result<Vec<String>> {
        let info: ServerInfo = self.get(&format!("/{}", API_VERSION)).await?;
        Ok(info.environment.addresses)
    }

    async fn migrate_from(&self, request: ContainerCreateRequest) -> Result<String> {
        let path = format!("/{}/containers", API_VERSION);
        Ok(self.post_async(&path, &request).await?.operation)
    }

    async fn wait_for_success(&self, operation: &str) -> Result<()> {
        let path = format!("{}/wait", operation.trim_end_matches('/'));
        let op: OperationState = self.get(&path).await?;
        if op.status_code == 200 {
            return Ok(());
        }
        let message = if op.err.is_empty() {
            format!("operation {} ended with status {}", operation, op.status)
        } else {
            op.err
        };
        Err(self.remote_error(message))
    }
}
