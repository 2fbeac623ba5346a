//! In-memory state for one interactive login attempt.

use crate::callback::CallbackResult;
use crate::error::{AuthError, AuthResult};
use crate::pkce;
use std::time::{Duration, Instant};

/// Status of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the user to authorize.
    Pending,
    /// A matching authorization code arrived.
    Authorized,
    /// The attempt ran out of time.
    Expired,
    /// The callback was rejected (error or state mismatch).
    Failed,
}

/// Transient record of one login attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub state_nonce: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub started_at: Instant,
    pub status: SessionStatus,
}

impl AuthSession {
    /// Start a new attempt with a fresh nonce and PKCE verifier.
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            state_nonce: pkce::generate_state(),
            code_verifier: pkce::generate_code_verifier(),
            redirect_uri: redirect_uri.into(),
            started_at: Instant::now(),
            status: SessionStatus::Pending,
        }
    }

    /// PKCE challenge derived from this session's verifier.
    pub fn code_challenge(&self) -> String {
        pkce::generate_code_challenge(&self.code_verifier)
    }

    /// Time left before `timeout` runs out, measured from `started_at`.
    pub fn remaining(&self, timeout: Duration) -> Duration {
        timeout.saturating_sub(self.started_at.elapsed())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, SessionStatus::Pending)
    }

    /// Mark the attempt as timed out.
    pub fn expire(&mut self) {
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Expired;
        }
    }

    /// Check a callback against this session and return the authorization code.
    ///
    /// Any result other than a code with the issued nonce fails the session.
    pub fn accept(&mut self, result: CallbackResult) -> AuthResult<String> {
        if self.is_terminal() {
            return Err(AuthError::auth_failed("Login attempt already finished"));
        }

        match result {
            CallbackResult::Code { code, state } => {
                if state != self.state_nonce {
                    self.status = SessionStatus::Failed;
                    return Err(AuthError::StateMismatch);
                }
                self.status = SessionStatus::Authorized;
                Ok(code)
            }
            CallbackResult::Error { error } => {
                self.status = SessionStatus::Failed;
                Err(AuthError::AuthFailed(error))
            }
        }
    }
}
