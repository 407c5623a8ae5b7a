// Dashboard client implementation
//
// HTTP client for a running trainboard daemon. Used by the `status` command
// and by the status watcher.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::session::{RenderingStatus, SessionStatus};
use crate::store::ConfigPatch;

/// Connection settings for the dashboard daemon
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon address ("127.0.0.1:5000" or a full http:// URL)
    pub address: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl ClientConfig {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: String,
}

/// HTTP client for the dashboard daemon
#[derive(Clone)]
pub struct DashboardClient {
    base_url: String,
    client: Client,
}

impl DashboardClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = if config.address.starts_with("http://")
            || config.address.starts_with("https://")
        {
            config.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", config.address)
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach dashboard for {}", what))?;
        Self::decode(response, what).await
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
                anyhow::bail!(
                    "{} failed ({}): {} [{}]",
                    what,
                    status,
                    body.error.message,
                    body.error.kind
                );
            }
            anyhow::bail!("{} failed ({}): {}", what, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    /// GET /health
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.send(self.client.get(self.url("/health")), "health check")
            .await
    }

    /// GET /api/session/status
    pub async fn session_status(&self) -> Result<SessionStatus> {
        debug!(base_url = %self.base_url, "Fetching session status");
        self.send(self.client.get(self.url("/api/session/status")), "status")
            .await
    }

    /// GET /api/session/rendering
    pub async fn rendering_status(&self) -> Result<RenderingStatus> {
        self.send(
            self.client.get(self.url("/api/session/rendering")),
            "rendering status",
        )
        .await
    }

    /// POST /api/session/start, optionally merging edits first
    pub async fn start_session(&self, patch: Option<&ConfigPatch>) -> Result<SessionStatus> {
        let mut request = self.client.post(self.url("/api/session/start"));
        if let Some(patch) = patch {
            request = request.json(patch);
        }
        self.send(request, "start").await
    }

    /// POST /api/session/stop
    pub async fn stop_session(&self) -> Result<SessionStatus> {
        self.send(self.client.post(self.url("/api/session/stop")), "stop")
            .await
    }

    /// GET /api/configs
    pub async fn list_configs(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ConfigList {
            configs: Vec<String>,
        }

        let list: ConfigList = self
            .send(self.client.get(self.url("/api/configs")), "config list")
            .await?;
        Ok(list.configs)
    }
}
