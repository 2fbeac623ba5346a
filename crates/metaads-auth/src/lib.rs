//! Meta access token acquisition for meta-ads-mcp.
//!
//! Two token sources implement [`AuthProvider`]:
//!
//! - [`MetaOAuthProvider`]: authorization-code flow directly against Meta,
//!   with a one-shot localhost [`CallbackListener`] receiving the redirect.
//! - [`PipeboardBroker`]: asks the Pipeboard broker for a login URL and polls
//!   it for the token it obtained on our behalf.
//!
//! Both persist the token they obtain in a [`TokenCache`].
//!
//! # Storage Location
//!
//! Token caches live in the platform config directory:
//! - Linux: `~/.config/meta-ads-mcp/`
//! - macOS: `~/Library/Application Support/meta-ads-mcp/`
//! - Windows: `%APPDATA%\meta-ads-mcp\`
//!
//! Files are created with restrictive permissions (0600 on Unix).
//!
//! # Example
//!
//! ```no_run
//! use metaads_auth::{AuthProvider, LoginMode, MetaOAuthConfig, MetaOAuthProvider, TokenCache, ProviderKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = TokenCache::for_provider(ProviderKind::Direct)?;
//!     let provider = MetaOAuthProvider::new(MetaOAuthConfig::default().with_app_id("1234"), cache);
//!
//!     if provider.cached_credential().await.is_none() {
//!         let prompt = provider.start_login().await?;
//!         println!("Open {}", prompt.login_url);
//!         let outcome = provider.await_login(LoginMode::Startup).await;
//!         println!("{:?}", outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod cache;
pub mod callback;
pub mod credential;
pub mod error;
pub mod oauth;
pub mod pkce;
pub mod provider;
pub mod session;

use std::path::PathBuf;

pub use broker::{PipeboardBroker, PipeboardConfig, PollPolicy, DEFAULT_PIPEBOARD_BASE_URL};
pub use cache::TokenCache;
pub use callback::{CallbackListener, CallbackResult, CALLBACK_PATH, DEFAULT_CALLBACK_PORT};
pub use credential::{Credential, ProviderKind};
pub use error::{AuthError, AuthResult};
pub use oauth::{
    FlowState, MetaOAuthConfig, MetaOAuthProvider, DEFAULT_GRAPH_API_VERSION,
    DEFAULT_LOGIN_TIMEOUT, DEFAULT_SCOPES,
};
pub use provider::{run_login, AuthOutcome, AuthProvider, LoginMode, LoginPrompt};
pub use session::{AuthSession, SessionStatus};

/// Application directory name under the platform config dir.
pub const APP_DIR_NAME: &str = "meta-ads-mcp";

/// Directory holding token caches and `config.json`.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR_NAME))
}
