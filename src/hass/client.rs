//! Home Assistant REST client.

use std::time::Duration;

use crate::config::HomeAssistantConfig;

/// Errors from the Home Assistant API.
#[derive(Debug, thiserror::Error)]
pub enum HassError {
    #[error("home assistant not configured: {0}")]
    Config(String),

    #[error("home assistant request failed: {0}")]
    Request(String),

    #[error("home assistant timed out after {0}s")]
    Timeout(u64),

    #[error("home assistant rejected the token")]
    Auth,

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("home assistant HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl HassError {
    /// Whether Home Assistant itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Timeout(_))
            || matches!(self, Self::Http { status, .. } if *status >= 500)
    }
}

/// Thin client for the Home Assistant REST API.
pub struct HassClient {
    base_url: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for HassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HassClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`HassError::Config`] if the base URL is empty or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HassError> {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            return Err(HassError::Config("url is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HassError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            token: token.into(),
            timeout,
            client,
        })
    }

    /// Build from the `[home_assistant]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`HassError::Config`] when the URL or token is missing.
    pub fn from_config(config: &HomeAssistantConfig) -> Result<Self, HassError> {
        let token = config
            .effective_token()
            .ok_or_else(|| HassError::Config("no token: set home_assistant.token or HASS_TOKEN".into()))?;
        Self::new(
            config.url.clone(),
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /api/services/<domain>/<service>` with `data` as the body.
    ///
    /// Returns the list of states Home Assistant reports as changed.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value, HassError> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        tracing::debug!(domain, service, "calling home assistant service");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(data)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        self.read_json(response, &format!("{domain}.{service}"))
            .await
    }

    /// `GET /api/states/<entity_id>`.
    pub async fn get_state(&self, entity_id: &str) -> Result<serde_json::Value, HassError> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        self.read_json(response, entity_id).await
    }

    async fn read_json(
        &self,
        response: reqwest::Response,
        target: &str,
    ) -> Result<serde_json::Value, HassError> {
        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| self.map_transport_error(&e))?;
            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| HassError::Request(format!("invalid JSON from home assistant: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => HassError::Auth,
            404 => HassError::NotFound(target.to_owned()),
            code => HassError::Http {
                status: code,
                message: extract_message(&body),
            },
        })
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> HassError {
        if e.is_timeout() {
            HassError::Timeout(self.timeout.as_secs())
        } else {
            HassError::Request(e.to_string())
        }
    }
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_owned())
}
