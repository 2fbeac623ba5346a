//! Graph API and tool error types.

use metaads_auth::{AuthError, LoginPrompt};
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for Graph API calls.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type for tool execution.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors returned by the Graph API client.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Meta rejected the token (HTTP 401 or error code 190).
    #[error("Access token rejected: {message}")]
    AuthExpired { message: String },

    /// Any other non-2xx response, passed through as Meta reported it.
    #[error("Graph API error {status}: {message}")]
    Remote {
        status: u16,
        code: Option<i64>,
        error_subcode: Option<i64>,
        error_type: Option<String>,
        message: String,
    },

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A 2xx response that is not what the endpoint should return.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GraphError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// JSON body for an error tool result.
    pub fn to_payload(&self) -> Value {
        match self {
            GraphError::Remote {
                status,
                code,
                error_subcode,
                error_type,
                message,
            } => json!({
                "error": {
                    "status": status,
                    "code": code,
                    "error_subcode": error_subcode,
                    "type": error_type,
                    "message": message,
                }
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

/// Errors that end a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No usable token; `prompt` tells the user how to log in.
    #[error("Authentication required: {reason}")]
    AuthRequired {
        reason: String,
        prompt: Option<LoginPrompt>,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ToolError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// JSON body for an error tool result.
    pub fn to_payload(&self) -> Value {
        match self {
            ToolError::Validation(message) => json!({ "error": format!("Invalid arguments: {message}") }),
            ToolError::AuthRequired { reason, prompt } => auth_required_payload(reason, prompt.as_ref()),
            ToolError::Graph(e) => e.to_payload(),
            ToolError::Auth(e) => json!({ "error": e.to_string() }),
        }
    }
}

fn auth_required_payload(reason: &str, prompt: Option<&LoginPrompt>) -> Value {
    match prompt {
        Some(prompt) => json!({
            "error": "Authentication required",
            "message": reason,
            "login_url": prompt.login_url,
            "markdown_link": format!("[Click here to authenticate with Meta Ads]({})", prompt.login_url),
            "expires_in": prompt.expires_in,
            "instructions": "Open the login link in a browser and approve access, then retry this request. \
                Present the link to the user as clickable Markdown using markdown_link.",
        }),
        None => json!({
            "error": "Authentication required",
            "message": reason,
            "instructions": "Provide an access_token argument, set META_APP_ID (or pass --app-id) for direct \
                Meta login, or set PIPEBOARD_API_TOKEN to log in through Pipeboard.",
        }),
    }
}
