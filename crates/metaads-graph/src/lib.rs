//! Meta Graph API tools for meta-ads-mcp.
//!
//! Each tool validates its arguments, issues one or a few Graph API requests
//! and reshapes the JSON response. The [`Dispatcher`] sits in front of every
//! tool: it resolves an access token, turns auth failures into login
//! instructions and exposes the tools as MCP tools.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod tools;

pub use client::{Download, GraphClient, DEFAULT_GRAPH_URL};
pub use dispatch::{BrowserOpener, Dispatcher, LOGIN_LINK_TOOL};
pub use error::{GraphError, GraphResult, ToolError, ToolResult};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use metaads_mcp::ToolContent;
use serde_json::Value;
use std::sync::Arc;

/// What a tool needs to talk to Meta.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub graph: GraphClient,
    pub access_token: String,
}

impl ToolContext {
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> GraphResult<Value> {
        self.graph.get(path, &self.access_token, params).await
    }

    pub async fn post(&self, path: &str, form: &[(String, String)]) -> GraphResult<Value> {
        self.graph.post(path, &self.access_token, form).await
    }
}

/// Result of tool execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Returned to the client as pretty-printed JSON text.
    Json(Value),
    /// Raw image bytes.
    Image { data: Vec<u8>, mime_type: String },
}

impl ToolOutput {
    /// Shorthand for `{"error": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Json(serde_json::json!({ "error": message.into() }))
    }

    /// Convert to MCP content items.
    pub fn into_content(self) -> Vec<ToolContent> {
        match self {
            ToolOutput::Json(value) => vec![ToolContent::text(to_pretty(&value))],
            ToolOutput::Image { data, mime_type } => vec![ToolContent::Image {
                data: STANDARD.encode(data),
                mime_type,
            }],
        }
    }
}

pub(crate) fn to_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// The main trait for tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool ID.
    fn id(&self) -> &str;

    /// Get the tool description (for the model).
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput>;
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;
