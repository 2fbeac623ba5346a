//! Authorization-code login directly against Meta.
//!
//! The flow binds a [`CallbackListener`] on localhost, sends the user to
//! Facebook's OAuth dialog with a random `state` and a PKCE challenge, and
//! exchanges the returned code for an access token. When an app secret is
//! configured the short-lived token is upgraded to a long-lived one.
//!
//! The current [`FlowState`] is published on a `watch` channel so that several
//! callers can follow the same login.

use crate::callback::{CallbackListener, CallbackResult, CALLBACK_PATH, DEFAULT_CALLBACK_PORT};
use crate::credential::{Credential, ProviderKind};
use crate::error::{AuthError, AuthResult};
use crate::provider::{AuthOutcome, AuthProvider, LoginMode, LoginPrompt};
use crate::session::AuthSession;
use crate::TokenCache;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Graph API version used when none is configured.
pub const DEFAULT_GRAPH_API_VERSION: &str = "v22.0";

/// Permissions requested from the user.
pub const DEFAULT_SCOPES: &str = "ads_read,ads_management,business_management,public_profile";

/// How long a login attempt stays open.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(180);

/// How long past its deadline a claimed login may take to settle before it
/// counts as abandoned.
const SETTLE_GRACE: Duration = Duration::from_secs(30);

const FACEBOOK_BASE_URL: &str = "https://www.facebook.com";
const GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Settings for the direct Meta OAuth flow.
#[derive(Debug, Clone)]
pub struct MetaOAuthConfig {
    /// Meta App ID (`client_id`). Login is impossible without it.
    pub app_id: Option<String>,
    /// Meta App secret, enables the long-lived token upgrade.
    pub app_secret: Option<String>,
    pub scopes: String,
    pub graph_api_version: String,
    /// Origin of the OAuth dialog.
    pub dialog_base_url: String,
    /// Origin of the token endpoint.
    pub graph_base_url: String,
    pub callback_port: u16,
    pub login_timeout: Duration,
}

impl Default for MetaOAuthConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            scopes: DEFAULT_SCOPES.to_string(),
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
            dialog_base_url: FACEBOOK_BASE_URL.to_string(),
            graph_base_url: GRAPH_BASE_URL.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

impl MetaOAuthConfig {
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Redirect URI for a listener on `port`.
    pub fn redirect_uri(port: u16) -> String {
        format!("http://localhost:{port}{CALLBACK_PATH}")
    }

    fn dialog_endpoint(&self) -> String {
        format!(
            "{}/{}/dialog/oauth",
            self.dialog_base_url.trim_end_matches('/'),
            self.graph_api_version
        )
    }

    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth/access_token",
            self.graph_base_url.trim_end_matches('/'),
            self.graph_api_version
        )
    }
}

/// Where the direct login currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    NoToken,
    AwaitingAuthorization,
    AwaitingCallback,
    TokenObtained,
    Failed(String),
    TimedOut,
}

impl FlowState {
    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            FlowState::AwaitingAuthorization | FlowState::AwaitingCallback
        )
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Build the Facebook OAuth dialog URL.
pub fn build_auth_url(
    config: &MetaOAuthConfig,
    app_id: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> String {
    let params = [
        ("client_id", app_id),
        ("redirect_uri", redirect_uri),
        ("scope", config.scopes.as_str()),
        ("response_type", "code"),
        ("state", state),
        ("code_challenge", code_challenge),
        ("code_challenge_method", "S256"),
    ];

    let query: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", config.dialog_endpoint(), query)
}

/// A login that has been started but not finished.
struct PendingLogin {
    session: AuthSession,
    /// Taken by whichever caller waits on the callback.
    listener: Option<CallbackListener>,
    login_url: String,
}

/// Direct Meta OAuth provider.
pub struct MetaOAuthProvider {
    config: MetaOAuthConfig,
    cache: TokenCache,
    http: reqwest::Client,
    state_tx: watch::Sender<FlowState>,
    pending: Mutex<Option<PendingLogin>>,
}

impl MetaOAuthProvider {
    pub fn new(config: MetaOAuthConfig, cache: TokenCache) -> Self {
        let (state_tx, _) = watch::channel(FlowState::NoToken);
        Self {
            config,
            cache,
            http: reqwest::Client::new(),
            state_tx,
            pending: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MetaOAuthConfig {
        &self.config
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Current flow state.
    pub fn state(&self) -> FlowState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to flow state changes.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: FlowState) {
        debug!(?state, "OAuth flow state");
        self.state_tx.send_replace(state);
    }

    fn app_id(&self) -> AuthResult<&str> {
        self.config
            .app_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthError::not_configured(
                    "No Meta App ID. Set META_APP_ID or pass --app-id, or set PIPEBOARD_API_TOKEN to use Pipeboard",
                )
            })
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str, session: &AuthSession) -> AuthResult<Credential> {
        let app_id = self.app_id()?;

        let mut params = vec![
            ("client_id", app_id),
            ("redirect_uri", session.redirect_uri.as_str()),
            ("code", code),
            ("code_verifier", session.code_verifier.as_str()),
        ];
        if let Some(secret) = self.config.app_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        debug!("Exchanging authorization code for access token");
        let token = self.request_token(&params).await?;
        Ok(Credential::new(token.access_token, ProviderKind::Direct)
            .with_expiry_secs(token.expires_in))
    }

    /// Upgrade a short-lived token to a long-lived one.
    ///
    /// Requires the app secret.
    pub async fn exchange_long_lived(&self, short_lived: &str) -> AuthResult<Credential> {
        let app_id = self.app_id()?;
        let secret = self
            .config
            .app_secret
            .as_deref()
            .ok_or_else(|| AuthError::not_configured("No Meta App secret"))?;

        let params = [
            ("grant_type", "fb_exchange_token"),
            ("client_id", app_id),
            ("client_secret", secret),
            ("fb_exchange_token", short_lived),
        ];

        debug!("Exchanging short-lived token for long-lived token");
        let token = self.request_token(&params).await?;
        Ok(Credential::new(token.access_token, ProviderKind::Direct)
            .with_expiry_secs(token.expires_in))
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::auth_failed(format!(
                "Token exchange failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(AuthError::auth_failed("Token endpoint returned an empty token"));
        }
        Ok(token)
    }

    /// Turn a callback into a cached credential.
    ///
    /// The login stays pending until this returns, so callers arriving
    /// during the code exchange reuse it instead of binding a new listener.
    async fn finish(&self, mut session: AuthSession, result: Option<CallbackResult>) -> AuthOutcome {
        let nonce = session.state_nonce.clone();

        let Some(result) = result else {
            session.expire();
            info!("Meta login timed out");
            self.settle(&nonce, FlowState::TimedOut).await;
            return AuthOutcome::TimedOut;
        };

        let code = match session.accept(result) {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "Meta login rejected");
                let reason = e.to_string();
                self.settle(&nonce, FlowState::Failed(reason.clone())).await;
                return AuthOutcome::Failed(reason);
            }
        };

        let mut credential = match self.exchange_code(&code, &session).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(error = %e, "Authorization code exchange failed");
                let reason = e.to_string();
                self.settle(&nonce, FlowState::Failed(reason.clone())).await;
                return AuthOutcome::Failed(reason);
            }
        };

        if self.config.app_secret.is_some() {
            match self.exchange_long_lived(&credential.access_token).await {
                Ok(long_lived) => credential = long_lived,
                Err(e) => warn!(error = %e, "Long-lived token exchange failed, keeping short-lived token"),
            }
        }

        if let Err(e) = self.cache.save(&credential).await {
            error!(error = %e, "Failed to save token cache");
        }

        info!(expires_in = ?credential.expires_in_secs(), "Meta login complete");
        self.settle(&nonce, FlowState::TokenObtained).await;
        AuthOutcome::Obtained(credential)
    }

    /// Publish the final state of the login identified by `nonce` and drop it.
    async fn settle(&self, nonce: &str, state: FlowState) {
        let mut pending = self.pending.lock().await;
        if pending
            .as_ref()
            .is_some_and(|p| p.session.state_nonce != nonce)
        {
            debug!("A newer login is in flight, not publishing stale outcome");
            return;
        }
        *pending = None;
        self.set_state(state);
    }

    /// Follow a login that another caller is driving.
    async fn follow(&self, budget: Duration) -> AuthOutcome {
        let mut rx = self.state_tx.subscribe();

        let watch_state = async {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    FlowState::TokenObtained => {
                        return match self.cache.load().await {
                            Some(credential) => AuthOutcome::Obtained(credential),
                            None => AuthOutcome::Failed("Token was not cached".to_string()),
                        };
                    }
                    FlowState::TimedOut => return AuthOutcome::TimedOut,
                    FlowState::Failed(reason) => return AuthOutcome::Failed(reason),
                    FlowState::NoToken => {
                        return AuthOutcome::Failed("Login was cancelled".to_string())
                    }
                    FlowState::AwaitingAuthorization | FlowState::AwaitingCallback => {}
                }
                if rx.changed().await.is_err() {
                    return AuthOutcome::Failed("Login was abandoned".to_string());
                }
            }
        };

        tokio::time::timeout(budget, watch_state)
            .await
            .unwrap_or(AuthOutcome::TimedOut)
    }
}

#[async_trait]
impl AuthProvider for MetaOAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    async fn cached_credential(&self) -> Option<Credential> {
        let credential = self.cache.load().await?;
        if credential.is_expired() {
            debug!("Cached Meta token is past its expiry, using it until rejected");
        }
        Some(credential)
    }

    async fn start_login(&self) -> AuthResult<LoginPrompt> {
        let app_id = self.app_id()?;
        let timeout = self.config.login_timeout;

        let mut pending = self.pending.lock().await;
        if let Some(p) = pending.as_ref() {
            let remaining = p.session.remaining(timeout);
            let live = !p.session.is_terminal() && !remaining.is_zero();
            // A claimed listener belongs to a waiter that settles the login
            // by its deadline; binding again would collide with it.
            let claimed = p.listener.is_none()
                && !p.session.remaining(timeout + SETTLE_GRACE).is_zero();
            if live || claimed {
                debug!(claimed, "Reusing login already in flight");
                return Ok(LoginPrompt {
                    login_url: p.login_url.clone(),
                    redirect_uri: Some(p.session.redirect_uri.clone()),
                    expires_in: remaining.as_secs(),
                });
            }
        }
        if let Some(stale) = pending.take() {
            if let Some(listener) = stale.listener {
                debug!("Releasing listener of an expired login");
                listener.shutdown().await;
            }
        }

        self.set_state(FlowState::AwaitingAuthorization);

        let mut session = AuthSession::new(String::new());
        let listener =
            match CallbackListener::bind(self.config.callback_port, session.state_nonce.clone())
                .await
            {
                Ok(listener) => listener,
                Err(e) => {
                    error!(port = self.config.callback_port, error = %e, "Failed to bind OAuth callback port");
                    self.set_state(FlowState::Failed(e.to_string()));
                    return Err(e);
                }
            };
        session.redirect_uri = MetaOAuthConfig::redirect_uri(listener.port());

        let login_url = build_auth_url(
            &self.config,
            app_id,
            &session.redirect_uri,
            &session.state_nonce,
            &session.code_challenge(),
        );

        let prompt = LoginPrompt {
            login_url: login_url.clone(),
            redirect_uri: Some(session.redirect_uri.clone()),
            expires_in: timeout.as_secs(),
        };

        *pending = Some(PendingLogin {
            session,
            listener: Some(listener),
            login_url,
        });
        self.set_state(FlowState::AwaitingCallback);

        info!(redirect_uri = ?prompt.redirect_uri, "Meta login started");
        Ok(prompt)
    }

    async fn await_login(&self, _mode: LoginMode) -> AuthOutcome {
        let timeout = self.config.login_timeout;

        let claimed = {
            let mut pending = self.pending.lock().await;
            pending.as_mut().map(|p| {
                let budget = p.session.remaining(timeout);
                let owned = p
                    .listener
                    .take()
                    .map(|listener| (listener, p.session.clone()));
                (owned, budget)
            })
        };

        let Some((owned, budget)) = claimed else {
            return match (self.state(), self.cache.load().await) {
                (FlowState::TimedOut, _) => AuthOutcome::TimedOut,
                (FlowState::Failed(reason), _) => AuthOutcome::Failed(reason),
                (_, Some(credential)) => AuthOutcome::Obtained(credential),
                (_, None) => AuthOutcome::Failed("No login in progress".to_string()),
            };
        };

        match owned {
            Some((listener, session)) => {
                let result = listener.wait(budget).await;
                self.finish(session, result).await
            }
            None => self.follow(budget).await,
        }
    }

    /// Clear the cached token. A login in flight is kept so its link
    /// stays valid.
    async fn invalidate(&self) -> AuthResult<()> {
        info!("Invalidating cached Meta token");
        {
            let pending = self.pending.lock().await;
            if pending.is_none() {
                self.set_state(FlowState::NoToken);
            } else {
                debug!("Keeping login in flight");
            }
        }
        self.cache.clear().await
    }
}

impl std::fmt::Debug for MetaOAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaOAuthProvider")
            .field("app_id", &self.config.app_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(graph_base_url: &str) -> MetaOAuthConfig {
        MetaOAuthConfig {
            graph_base_url: graph_base_url.to_string(),
            callback_port: 0,
            login_timeout: Duration::from_secs(5),
            ..MetaOAuthConfig::default().with_app_id("123456")
        }
    }

    fn provider(config: MetaOAuthConfig) -> (MetaOAuthProvider, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::with_path(dir.path().join("token_cache.json"));
        (MetaOAuthProvider::new(config, cache), dir)
    }

    fn query(url: &str) -> HashMap<String, String> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn hit_callback(redirect_uri: &str, code: &str, state: &str) {
        let port = url::Url::parse(redirect_uri).unwrap().port().unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!(
            "GET /callback?code={code}&state={state} HTTP/1.1\r\nHost: localhost\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response).await;
    }

    #[test]
    fn test_build_auth_url() {
        let config = MetaOAuthConfig::default();
        let url = build_auth_url(
            &config,
            "123456",
            "http://localhost:8888/callback",
            "nonce",
            "challenge",
        );

        assert!(url.starts_with("https://www.facebook.com/v22.0/dialog/oauth?"));
        let params = query(&url);
        assert_eq!(params["client_id"], "123456");
        assert_eq!(params["redirect_uri"], "http://localhost:8888/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "nonce");
        assert_eq!(params["code_challenge"], "challenge");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], DEFAULT_SCOPES);
    }

    #[test]
    fn test_endpoints_follow_version() {
        let config = MetaOAuthConfig {
            graph_api_version: "v19.0".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.token_endpoint(),
            "https://graph.facebook.com/v19.0/oauth/access_token"
        );
        assert_eq!(
            MetaOAuthConfig::redirect_uri(8888),
            "http://localhost:8888/callback"
        );
    }

    #[tokio::test]
    async fn test_start_login_without_app_id() {
        let config = MetaOAuthConfig {
            callback_port: 0,
            ..Default::default()
        };
        let (provider, _dir) = provider(config);

        let err = provider.start_login().await.unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured(_)));
        assert!(err.to_string().contains("META_APP_ID"));
    }

    #[tokio::test]
    async fn test_start_login_reuses_in_flight_prompt() {
        let (provider, _dir) = provider(test_config("http://127.0.0.1:1"));

        let first = provider.start_login().await.unwrap();
        let second = provider.start_login().await.unwrap();

        assert_eq!(first.login_url, second.login_url);
        assert_eq!(first.redirect_uri, second.redirect_uri);
        assert_eq!(provider.state(), FlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn test_full_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .and(body_string_contains("code=AQD-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "EAAB-short",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (provider, _dir) = provider(test_config(&server.uri()));
        let prompt = provider.start_login().await.unwrap();
        let state = query(&prompt.login_url)["state"].clone();
        let redirect = prompt.redirect_uri.clone().unwrap();

        let waiter = provider.await_login(LoginMode::Tool);
        let (outcome, _) = tokio::join!(waiter, hit_callback(&redirect, "AQD-code", &state));

        let credential = outcome.into_credential().unwrap();
        assert_eq!(credential.access_token, "EAAB-short");
        assert!(credential.expires_at.is_some());
        assert_eq!(provider.state(), FlowState::TokenObtained);
        assert_eq!(provider.cached_credential().await, Some(credential));
    }

    #[tokio::test]
    async fn test_state_mismatch_never_obtains_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "should-not-be-used"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let (provider, _dir) = provider(test_config(&server.uri()));
        let prompt = provider.start_login().await.unwrap();
        let redirect = prompt.redirect_uri.clone().unwrap();

        let waiter = provider.await_login(LoginMode::Tool);
        let (outcome, _) = tokio::join!(waiter, hit_callback(&redirect, "code", "forged"));

        assert!(matches!(outcome, AuthOutcome::Failed(ref r) if r.contains("state mismatch")));
        assert!(matches!(provider.state(), FlowState::Failed(_)));
        assert!(provider.cached_credential().await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let mut config = test_config("http://127.0.0.1:1");
        config.login_timeout = Duration::from_millis(100);
        let (provider, _dir) = provider(config);

        let prompt = provider.start_login().await.unwrap();
        let port = url::Url::parse(prompt.redirect_uri.as_deref().unwrap())
            .unwrap()
            .port()
            .unwrap();

        let outcome = provider.await_login(LoginMode::Startup).await;
        assert_eq!(outcome, AuthOutcome::TimedOut);
        assert_eq!(provider.state(), FlowState::TimedOut);
        assert!(CallbackListener::is_port_available(port).await);
    }

    #[tokio::test]
    async fn test_second_waiter_follows_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "EAAB-shared"
            })))
            .mount(&server)
            .await;

        let (provider, _dir) = provider(test_config(&server.uri()));
        let prompt = provider.start_login().await.unwrap();
        let state = query(&prompt.login_url)["state"].clone();
        let redirect = prompt.redirect_uri.clone().unwrap();

        let (first, second, _) = tokio::join!(
            provider.await_login(LoginMode::Tool),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                provider.await_login(LoginMode::Startup).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                hit_callback(&redirect, "code", &state).await
            }
        );

        assert_eq!(first.into_credential().unwrap().access_token, "EAAB-shared");
        assert_eq!(second.into_credential().unwrap().access_token, "EAAB-shared");
    }

    fn port_of(prompt: &LoginPrompt) -> u16 {
        url::Url::parse(prompt.redirect_uri.as_deref().unwrap())
            .unwrap()
            .port()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalidate_keeps_login_in_flight() {
        let (provider, _dir) = provider(test_config("http://127.0.0.1:1"));
        let provider = Arc::new(provider);
        provider
            .cache()
            .save(&Credential::new("X", ProviderKind::Direct))
            .await
            .unwrap();

        let first = provider.start_login().await.unwrap();
        let waiter = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.await_login(LoginMode::Tool).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        provider.invalidate().await.unwrap();
        let second = provider.start_login().await.unwrap();

        assert!(provider.cached_credential().await.is_none());
        assert_eq!(second.login_url, first.login_url);
        assert_eq!(second.redirect_uri, first.redirect_uri);
        assert_eq!(provider.state(), FlowState::AwaitingCallback);
        waiter.abort();
    }

    #[tokio::test]
    async fn test_login_during_code_exchange_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "EAAB-slow"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (provider, _dir) = provider(test_config(&server.uri()));
        let provider = Arc::new(provider);
        let first = provider.start_login().await.unwrap();
        let state = query(&first.login_url)["state"].clone();
        let waiter = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.await_login(LoginMode::Tool).await }
        });

        hit_callback(first.redirect_uri.as_deref().unwrap(), "code", &state).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let during = provider.start_login().await.unwrap();
        assert_eq!(during.login_url, first.login_url);
        assert_eq!(during.redirect_uri, first.redirect_uri);

        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.into_credential().unwrap().access_token, "EAAB-slow");
        assert_eq!(provider.state(), FlowState::TokenObtained);
        assert!(CallbackListener::is_port_available(port_of(&first)).await);
    }

    #[tokio::test]
    async fn test_expired_unclaimed_login_releases_port() {
        let mut config = test_config("http://127.0.0.1:1");
        config.login_timeout = Duration::from_millis(100);
        let (provider, _dir) = provider(config);

        let first = provider.start_login().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = provider.start_login().await.unwrap();

        assert_ne!(second.login_url, first.login_url);
        assert!(CallbackListener::is_port_available(port_of(&first)).await);
        assert_eq!(provider.state(), FlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn test_long_lived_upgrade() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .and(body_string_contains("grant_type=fb_exchange_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "EAAB-long",
                "expires_in": 5184000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.app_secret = Some("secret".to_string());
        let (provider, _dir) = provider(config);

        let credential = provider.exchange_long_lived("EAAB-short").await.unwrap();
        assert_eq!(credential.access_token, "EAAB-long");
        assert!(credential.expires_in_secs().unwrap() > 5_000_000);
    }

    #[tokio::test]
    async fn test_exchange_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/oauth/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid verification code format.", "code": 100}
            })))
            .mount(&server)
            .await;

        let (provider, _dir) = provider(test_config(&server.uri()));
        let session = AuthSession::new("http://localhost:8888/callback");
        let err = provider.exchange_code("bad", &session).await.unwrap_err();
        assert!(err.to_string().contains("Token exchange failed"));
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache_and_state() {
        let (provider, _dir) = provider(test_config("http://127.0.0.1:1"));
        provider
            .cache()
            .save(&Credential::new("X", ProviderKind::Direct))
            .await
            .unwrap();

        provider.invalidate().await.unwrap();

        assert!(provider.cached_credential().await.is_none());
        assert_eq!(provider.state(), FlowState::NoToken);
    }

    #[tokio::test]
    async fn test_expired_token_still_returned() {
        let (provider, _dir) = provider(test_config("http://127.0.0.1:1"));
        let expired = Credential::new("X", ProviderKind::Direct)
            .with_expires_at(Some(chrono::Utc::now() - chrono::Duration::hours(1)));
        provider.cache().save(&expired).await.unwrap();

        assert_eq!(provider.cached_credential().await, Some(expired));
    }
}
