//! Error types for authentication operations.

use thiserror::Error;

/// Errors that can occur while obtaining or storing a Meta access token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable token; the user has to log in.
    #[error("Authentication required")]
    AuthRequired,

    /// The interactive login did not finish in time.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// The callback carried a `state` that does not match the issued nonce.
    #[error("OAuth state mismatch - potential CSRF attack")]
    StateMismatch,

    /// The authorization server or token endpoint rejected the login.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The provider is missing required configuration (e.g. the App ID).
    #[error("Authentication not configured: {0}")]
    NotConfigured(String),

    /// The token broker returned an unexpected response.
    #[error("Token broker error: {0}")]
    Broker(String),

    /// Failed to read or write the token cache or bind the callback port.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize token data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level failure talking to Meta or the broker.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Could not determine the config directory.
    #[error("Could not determine config directory")]
    NoConfigDir,
}

impl AuthError {
    /// Create an authentication failed error.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    /// Create a not configured error.
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    /// Create a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
