//! HTTP control plane that sits beside the session socket: first-run setup
//! and the gateway's structured settings.

use std::fmt;

use {
    reqwest::{Client, RequestBuilder, Response},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
    tether_config::GatewaySettings,
    tracing::debug,
};

use crate::error::{Error, Result};

const FALLBACK_ERROR: &str = "request failed";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConfigSchema {
    pub sections: Vec<SchemaSection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemaSection {
    pub key: String,
    pub label: String,
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemaField {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub group: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub default: Value,
}

/// Outcome of `PUT /api/config`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SaveConfigResult {
    #[serde(default)]
    pub status: Option<String>,
    /// The gateway must restart for the change to apply.
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct ControlClient {
    client: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<Secret<String>>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.expose_secret().trim().is_empty()),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self::new(settings.http_base_url(), settings.api_key.clone())
    }

    /// `POST /api/setup/init`. Runs before any key exists, so never
    /// authenticated.
    pub async fn setup_init(&self, body: &Value) -> Result<()> {
        let request = self.client.post(self.url("/api/setup/init")).json(body);
        ensure_success(request.send().await?).await?;
        Ok(())
    }

    /// `PUT /api/setup/complete`.
    pub async fn setup_complete(&self, body: &Value) -> Result<()> {
        let request = self
            .authorized(self.client.put(self.url("/api/setup/complete")))
            .json(body);
        ensure_success(request.send().await?).await?;
        Ok(())
    }

    pub async fn config_schema(&self) -> Result<ConfigSchema> {
        self.get_json("/api/config/schema").await
    }

    pub async fn config(&self) -> Result<Map<String, Value>> {
        self.get_json("/api/config").await
    }

    pub async fn save_config(&self, config: &Map<String, Value>) -> Result<SaveConfigResult> {
        let request = self
            .authorized(self.client.put(self.url("/api/config")))
            .json(config);
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.authorized(self.client.get(self.url(path)));
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    debug!(status = status.as_u16(), %message, "control plane request failed");
    Err(Error::Http {
        status: status.as_u16(),
        message,
    })
}

/// The `error` field of a JSON error body, or a generic message.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| FALLBACK_ERROR.to_string())
}
