//! Config schema types (gateway endpoint, reconnect policy, mirror, voice).

use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tether_protocol::INPUT_MODE_ASSISTANT,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub gateway: GatewaySettings,
    pub reconnect: ReconnectConfig,
    pub mirror: MirrorConfig,
    pub voice: VoiceConfig,
}

impl TetherConfig {
    /// Reject settings that cannot produce a working session.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.port == 0 {
            anyhow::bail!("gateway.port must be non-zero");
        }
        if self.reconnect.initial_backoff_ms == 0 {
            anyhow::bail!("reconnect.initial_backoff_ms must be non-zero");
        }
        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            anyhow::bail!("reconnect.max_backoff_ms must be >= reconnect.initial_backoff_ms");
        }
        if self.reconnect.handshake_timeout_ms == 0 {
            anyhow::bail!("reconnect.handshake_timeout_ms must be non-zero");
        }
        if self.mirror.initial_load == 0 || self.mirror.page_size == 0 {
            anyhow::bail!("mirror.initial_load and mirror.page_size must be non-zero");
        }
        Ok(())
    }
}

/// Where the gateway lives and how to authenticate with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// WebSocket path, with or without a leading slash.
    pub path: String,
    /// Port of the HTTP control plane (setup and config endpoints).
    pub http_port: u16,
    pub tls: bool,
    /// Bearer token. Authentication is skipped when unset.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18793,
            path: "ws".into(),
            http_port: 18790,
            tls: false,
            api_key: None,
        }
    }
}

impl GatewaySettings {
    /// `scheme://host:port/path` for the session transport.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls {
            "wss"
        } else {
            "ws"
        };
        let path = self.path.trim_start_matches('/');
        format!("{scheme}://{}:{}/{path}", self.host, self.port)
    }

    #[must_use]
    pub fn http_base_url(&self) -> String {
        let scheme = if self.tls {
            "https"
        } else {
            "http"
        };
        format!("{scheme}://{}:{}", self.host, self.http_port)
    }

    /// The API key, if one is set and non-blank.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Reconnect and liveness policy for the session transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Ping interval; twice this without inbound traffic drops the link.
    /// Zero disables keepalive.
    pub keepalive_secs: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            keepalive_secs: 30,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Local conversation mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Number of turns visible before any `load_more`.
    pub initial_load: usize,
    /// Turns added to the window by each `load_more`.
    pub page_size: usize,
    /// Overrides the default data directory for the database and media.
    pub data_dir: Option<PathBuf>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            initial_load: 50,
            page_size: 30,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Input mode tag attached to spoken turns.
    pub input_mode: String,
    /// Upper bound for a single playback before it is treated as failed.
    pub playback_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            input_mode: INPUT_MODE_ASSISTANT.into(),
            playback_timeout_secs: 120,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_urls() {
        let gw = GatewaySettings::default();
        assert_eq!(gw.ws_url(), "ws://127.0.0.1:18793/ws");
        assert_eq!(gw.http_base_url(), "http://127.0.0.1:18790");
    }

    #[test]
    fn tls_switches_schemes() {
        let gw = GatewaySettings {
            host: "gw.local".into(),
            port: 443,
            path: "/session".into(),
            http_port: 8443,
            tls: true,
            api_key: None,
        };
        assert_eq!(gw.ws_url(), "wss://gw.local:443/session");
        assert_eq!(gw.http_base_url(), "https://gw.local:8443");
    }

    #[test]
    fn blank_api_key_is_none() {
        let mut gw = GatewaySettings::default();
        assert!(gw.api_key().is_none());
        gw.api_key = Some(Secret::new("  ".into()));
        assert!(gw.api_key().is_none());
        gw.api_key = Some(Secret::new("secret-key".into()));
        assert_eq!(gw.api_key(), Some("secret-key"));
    }

    #[test]
    fn api_key_survives_toml_round_trip() {
        let mut cfg = TetherConfig::default();
        cfg.gateway.api_key = Some(Secret::new("k1".into()));
        let text = toml::to_string(&cfg).unwrap();
        let parsed: TetherConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.gateway.api_key(), Some("k1"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: TetherConfig = toml::from_str("[gateway]\nport = 9000\n").unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
        assert_eq!(cfg.reconnect.max_backoff_ms, 30_000);
        assert_eq!(cfg.mirror.page_size, 30);
        assert_eq!(cfg.voice.input_mode, INPUT_MODE_ASSISTANT);
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let mut cfg = TetherConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.reconnect.max_backoff_ms = 10;
        assert!(cfg.validate().is_err());
    }
}
