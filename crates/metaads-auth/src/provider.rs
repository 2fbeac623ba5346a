//! The seam between the tool layer and the two token sources.

use crate::credential::{Credential, ProviderKind};
use crate::error::AuthResult;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Result of a bounded login or polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A token was obtained and cached.
    Obtained(Credential),
    /// The time or attempt budget ran out without a token.
    TimedOut,
    /// The login was rejected.
    Failed(String),
}

impl AuthOutcome {
    pub fn is_obtained(&self) -> bool {
        matches!(self, AuthOutcome::Obtained(_))
    }

    pub fn into_credential(self) -> Option<Credential> {
        match self {
            AuthOutcome::Obtained(credential) => Some(credential),
            _ => None,
        }
    }
}

/// What the user has to do to finish a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginPrompt {
    /// URL to open in a browser.
    pub login_url: String,
    /// Local redirect URI, for the direct flow only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Seconds left before the login attempt is abandoned.
    pub expires_in: u64,
}

/// Who is waiting on a login, which decides how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    /// Started by a tool call; waits in the background.
    #[default]
    Tool,
    /// Started from the command line before the server runs.
    Startup,
}

/// A source of Meta access tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// The cached credential, if any. Never prompts.
    async fn cached_credential(&self) -> Option<Credential>;

    /// Begin an interactive login, or return the one already in flight.
    async fn start_login(&self) -> AuthResult<LoginPrompt>;

    /// Wait for the login started by [`AuthProvider::start_login`] to finish.
    async fn await_login(&self, mode: LoginMode) -> AuthOutcome;

    /// Forget the cached credential and any login in flight.
    async fn invalidate(&self) -> AuthResult<()>;
}

/// Run a full interactive login: start it, show the prompt, wait for the result.
pub async fn run_login<F>(
    provider: &dyn AuthProvider,
    mode: LoginMode,
    on_prompt: F,
) -> AuthResult<AuthOutcome>
where
    F: FnOnce(&LoginPrompt),
{
    let prompt = provider.start_login().await?;
    info!(provider = %provider.kind(), "Waiting for login");
    on_prompt(&prompt);
    Ok(provider.await_login(mode).await)
}
