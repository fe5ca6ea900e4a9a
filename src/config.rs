//! Configuration types for the sync client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server endpoint and authentication.
    pub server: ServerConfig,
    /// Automatic reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Client keepalive pings.
    pub keepalive: KeepaliveConfig,
    /// Foreground/background policy.
    pub lifecycle: LifecycleConfig,
    /// Log output.
    pub logging: LoggingConfig,
    /// Keyring location of the auth token.
    pub credentials: CredentialsConfig,
}

/// How the bearer token is presented to the server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `?token=<token>` on the connect URL.
    #[default]
    Query,
    /// `Authorization: Bearer <token>` on the upgrade request.
    Header,
    /// `{"type":"auth","token":...}` as the first frame after open.
    Handshake,
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// REST API base URL, e.g. `https://todo.example.com/api`.
    pub api_base_url: String,
    /// Explicit WebSocket URL. Derived from `api_base_url` when unset.
    pub ws_url: Option<String>,
    /// Credential presentation.
    pub auth_mode: AuthMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_owned(),
            ws_url: None,
            auth_mode: AuthMode::Query,
        }
    }
}

impl ServerConfig {
    /// The WebSocket endpoint.
    ///
    /// Without an explicit `ws_url` the REST base is reused: the `/api`
    /// segment is dropped, the scheme switches to `ws`/`wss` and `/ws` is
    /// appended (`http://host:8080/api` becomes `ws://host:8080/ws`).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the URL cannot be parsed or has a
    /// scheme other than http(s)/ws(s).
    pub fn websocket_url(&self) -> Result<url::Url> {
        if let Some(explicit) = &self.ws_url {
            return url::Url::parse(explicit)
                .map_err(|e| SyncError::Config(format!("invalid ws_url {explicit:?}: {e}")));
        }

        let mut url = url::Url::parse(&self.api_base_url).map_err(|e| {
            SyncError::Config(format!("invalid api_base_url {:?}: {e}", self.api_base_url))
        })?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyncError::Config(format!(
                    "unsupported scheme {other:?} in api_base_url"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| SyncError::Config(format!("cannot switch scheme to {scheme}")))?;

        let base = url.path().trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        let path = format!("{base}/ws");
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}

/// Automatic reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay unit in milliseconds; attempt `n` waits `n × base`.
    pub base_delay_ms: u64,
    /// Automatic attempts before giving up with an error status.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.clamp(1, self.max_attempts.max(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Client keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Seconds between client pings; 0 disables them.
    pub ping_interval_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
        }
    }
}

impl KeepaliveConfig {
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

/// Foreground/background policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Drop the connection while the app is backgrounded.
    pub disconnect_in_background: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            disconnect_in_background: true,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            log_dir: None,
        }
    }
}

/// Keyring location of the auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub service: String,
    pub account: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service: "homesync".to_owned(),
            account: "auth_token".to_owned(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/homesync/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("homesync")
            .join("config.toml")
    }
}
