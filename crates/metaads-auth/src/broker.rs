//! Token source backed by the Pipeboard broker.
//!
//! Pipeboard performs the Meta OAuth exchange on its side. We only ask it for
//! a login URL and then poll until the token it holds for our API key shows up.

use crate::credential::{timestamp, Credential, ProviderKind};
use crate::error::{AuthError, AuthResult};
use crate::provider::{AuthOutcome, AuthProvider, LoginMode, LoginPrompt};
use crate::TokenCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Production Pipeboard API.
pub const DEFAULT_PIPEBOARD_BASE_URL: &str = "https://pipeboard.co/api";

/// Client name sent when starting a login.
pub const CLIENT_NAME: &str = "meta-ads-mcp";

/// How often and how many times to ask the broker for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Short wait after a tool hands out a login link.
    pub const fn tool() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 5,
        }
    }

    /// Long wait for `--login` at startup.
    pub const fn startup() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 90,
        }
    }

    /// Total time the policy may spend sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Pipeboard settings.
#[derive(Debug, Clone)]
pub struct PipeboardConfig {
    pub api_token: String,
    pub base_url: String,
    pub tool_poll: PollPolicy,
    pub startup_poll: PollPolicy,
}

impl PipeboardConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            base_url: DEFAULT_PIPEBOARD_BASE_URL.to_string(),
            tool_poll: PollPolicy::tool(),
            startup_poll: PollPolicy::startup(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(default)]
    login_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Pipeboard broker provider.
pub struct PipeboardBroker {
    config: PipeboardConfig,
    cache: TokenCache,
    http: reqwest::Client,
    /// Login URL handed out most recently and when.
    login: Mutex<Option<(String, Instant)>>,
}

impl PipeboardBroker {
    pub fn new(config: PipeboardConfig, cache: TokenCache) -> Self {
        Self {
            config,
            cache,
            http: reqwest::Client::new(),
            login: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Return a token, from the cache when allowed, else from the broker.
    ///
    /// Never fails: broker errors and unfinished logins both yield `None`.
    pub async fn get_access_token(&self, force_refresh: bool) -> Option<Credential> {
        if !force_refresh {
            if let Some(credential) = self.cache.load().await {
                if !credential.is_expired() {
                    return Some(credential);
                }
                debug!("Cached Pipeboard token expired, asking broker");
            }
        }

        match self.fetch_token().await {
            Ok(Some(credential)) => {
                if let Err(e) = self.cache.save(&credential).await {
                    error!(error = %e, "Failed to save Pipeboard token cache");
                }
                Some(credential)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to get token from Pipeboard");
                None
            }
        }
    }

    async fn fetch_token(&self) -> AuthResult<Option<Credential>> {
        let response = self
            .http
            .get(self.config.endpoint("meta/token"))
            .query(&[("api_token", self.config.api_token.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "Pipeboard token not available yet");
            return Ok(None);
        }

        let body: TokenResponse = response.json().await?;
        let Some(token) = body.access_token.filter(|t| !t.is_empty()) else {
            debug!("Pipeboard response carried no token");
            return Ok(None);
        };

        let credential = Credential::new(token, ProviderKind::Broker);
        let credential = match body.expires_at {
            Some(expires_at) => credential.with_expires_at(Some(expires_at)),
            None => credential.with_expiry_secs(body.expires_in),
        };
        Ok(Some(credential))
    }

    /// Ask Pipeboard for a login URL.
    pub async fn initiate_auth_flow(&self) -> AuthResult<String> {
        let response = self
            .http
            .post(self.config.endpoint("meta/auth"))
            .query(&[("api_token", self.config.api_token.as_str())])
            .json(&serde_json::json!({ "client_name": CLIENT_NAME }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::broker(format!(
                "Login request failed: {} - {}",
                status, body
            )));
        }

        let body: AuthResponse = response.json().await?;
        debug!(status = ?body.status, "Pipeboard login initiated");
        body.login_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AuthError::broker("Response has no loginUrl"))
    }

    /// Poll the broker until a token appears or the attempts run out.
    pub async fn poll_for_token(&self, policy: PollPolicy) -> AuthOutcome {
        for attempt in 1..=policy.max_attempts {
            debug!(attempt, max_attempts = policy.max_attempts, "Polling Pipeboard for token");
            if let Some(credential) = self.get_access_token(true).await {
                info!(attempt, "Pipeboard token obtained");
                *self.login.lock().await = None;
                return AuthOutcome::Obtained(credential);
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        info!(attempts = policy.max_attempts, "Gave up waiting for Pipeboard token");
        AuthOutcome::TimedOut
    }
}

#[async_trait]
impl AuthProvider for PipeboardBroker {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Broker
    }

    async fn cached_credential(&self) -> Option<Credential> {
        self.get_access_token(false).await
    }

    async fn start_login(&self) -> AuthResult<LoginPrompt> {
        let budget = self.config.startup_poll.budget();
        let mut login = self.login.lock().await;

        if let Some((url, started)) = login.as_ref() {
            let elapsed = started.elapsed();
            if elapsed < budget {
                return Ok(LoginPrompt {
                    login_url: url.clone(),
                    redirect_uri: None,
                    expires_in: (budget - elapsed).as_secs(),
                });
            }
        }

        let login_url = self.initiate_auth_flow().await?;
        info!("Pipeboard login started");
        *login = Some((login_url.clone(), Instant::now()));

        Ok(LoginPrompt {
            login_url,
            redirect_uri: None,
            expires_in: budget.as_secs(),
        })
    }

    async fn await_login(&self, mode: LoginMode) -> AuthOutcome {
        let policy = match mode {
            LoginMode::Tool => self.config.tool_poll,
            LoginMode::Startup => self.config.startup_poll,
        };
        self.poll_for_token(policy).await
    }

    async fn invalidate(&self) -> AuthResult<()> {
        info!("Invalidating cached Pipeboard token");
        *self.login.lock().await = None;
        self.cache.clear().await
    }
}

impl std::fmt::Debug for PipeboardBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeboardBroker")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}
