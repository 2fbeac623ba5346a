//! Runtime configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config.json` in the config directory (`~/.config/meta-ads-mcp/` on Linux)
//! 3. Environment variables (`META_APP_ID`, `META_APP_SECRET`, `PIPEBOARD_API_TOKEN`,
//!    `META_GRAPH_API_VERSION`, `META_ADS_CALLBACK_PORT`)
//! 4. Command line flags

use anyhow::Context;
use metaads_auth::{
    MetaOAuthConfig, PipeboardConfig, ProviderKind, DEFAULT_CALLBACK_PORT,
    DEFAULT_GRAPH_API_VERSION, DEFAULT_LOGIN_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Name of the optional config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_APP_ID: &str = "META_APP_ID";
pub const ENV_APP_SECRET: &str = "META_APP_SECRET";
pub const ENV_PIPEBOARD_API_TOKEN: &str = "PIPEBOARD_API_TOKEN";
pub const ENV_GRAPH_API_VERSION: &str = "META_GRAPH_API_VERSION";
pub const ENV_CALLBACK_PORT: &str = "META_ADS_CALLBACK_PORT";

/// One configuration layer. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeboard_api_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_timeout_secs: Option<u64>,
}

impl ConfigLayer {
    /// Load a config file. A missing file is an empty layer.
    pub async fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Read the environment through `lookup`. Empty values count as unset.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let callback_port = var(ENV_CALLBACK_PORT).and_then(|raw| match raw.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(value = %raw, "Ignoring invalid {}", ENV_CALLBACK_PORT);
                None
            }
        });

        Self {
            app_id: var(ENV_APP_ID),
            app_secret: var(ENV_APP_SECRET),
            pipeboard_api_token: var(ENV_PIPEBOARD_API_TOKEN),
            graph_api_version: var(ENV_GRAPH_API_VERSION),
            callback_port,
            login_timeout_secs: None,
        }
    }

    /// Merge another layer into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            app_id: other.app_id.or(self.app_id),
            app_secret: other.app_secret.or(self.app_secret),
            pipeboard_api_token: other.pipeboard_api_token.or(self.pipeboard_api_token),
            graph_api_version: other.graph_api_version.or(self.graph_api_version),
            callback_port: other.callback_port.or(self.callback_port),
            login_timeout_secs: other.login_timeout_secs.or(self.login_timeout_secs),
        }
    }
}

/// Resolved configuration.
#[derive(Clone)]
pub struct Config {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub pipeboard_api_token: Option<String>,
    pub graph_api_version: String,
    pub callback_port: u16,
    pub login_timeout: Duration,
}

impl Config {
    /// Load from the config directory, the process environment and `cli`.
    pub async fn load(cli: ConfigLayer) -> anyhow::Result<Self> {
        let file = match metaads_auth::default_cache_dir() {
            Some(dir) => ConfigLayer::load_file(&dir.join(CONFIG_FILE_NAME)).await?,
            None => ConfigLayer::default(),
        };
        let env = ConfigLayer::from_env(|key| std::env::var(key).ok());
        Ok(Self::from_layers([file, env, cli]))
    }

    /// Apply `layers` in order over the defaults.
    pub fn from_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Self {
        let merged = layers
            .into_iter()
            .fold(ConfigLayer::default(), ConfigLayer::merge);

        Self {
            app_id: merged.app_id,
            app_secret: merged.app_secret,
            pipeboard_api_token: merged.pipeboard_api_token,
            graph_api_version: merged
                .graph_api_version
                .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            callback_port: merged.callback_port.unwrap_or(DEFAULT_CALLBACK_PORT),
            login_timeout: merged
                .login_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LOGIN_TIMEOUT),
        }
    }

    /// The broker is used whenever a Pipeboard token is configured.
    pub fn provider_kind(&self) -> ProviderKind {
        if self.pipeboard_api_token.is_some() {
            ProviderKind::Broker
        } else {
            ProviderKind::Direct
        }
    }

    pub fn oauth_config(&self) -> MetaOAuthConfig {
        MetaOAuthConfig {
            app_id: self.app_id.clone(),
            app_secret: self.app_secret.clone(),
            graph_api_version: self.graph_api_version.clone(),
            callback_port: self.callback_port,
            login_timeout: self.login_timeout,
            ..MetaOAuthConfig::default()
        }
    }

    pub fn pipeboard_config(&self) -> Option<PipeboardConfig> {
        self.pipeboard_api_token.as_deref().map(PipeboardConfig::new)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "pipeboard_api_token",
                &self.pipeboard_api_token.as_ref().map(|_| "<redacted>"),
            )
            .field("graph_api_version", &self.graph_api_version)
            .field("callback_port", &self.callback_port)
            .field("login_timeout", &self.login_timeout)
            .finish()
    }
}
