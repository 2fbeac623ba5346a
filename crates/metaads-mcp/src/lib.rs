//! Model Context Protocol (MCP) server plumbing for meta-ads-mcp.
//!
//! Tools are registered on an [`McpServer`], which routes JSON-RPC requests
//! independently of the transport. Two transports are provided:
//!
//! - **stdio**: line-delimited JSON on stdin/stdout ([`serve_stdio`])
//! - **SSE**: HTTP with Server-Sent Events ([`serve_sse`])
//!
//! # Example
//!
//! ```no_run
//! use metaads_mcp::{serve_stdio, McpServer, McpServerToolBuilder, McpToolExecutor, ToolContent};
//! use serde_json::Value;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl McpToolExecutor for Hello {
//!     async fn execute(&self, _args: Value) -> Result<Vec<ToolContent>, String> {
//!         Ok(vec![ToolContent::text("hello")])
//!     }
//! }
//!
//! # async fn example() -> metaads_mcp::McpResult<()> {
//! let hello = McpServerToolBuilder::new("hello")
//!     .description("Say hello")
//!     .build(Hello);
//!
//! let server = McpServer::new("meta-ads", env!("CARGO_PKG_VERSION")).with_tools([hello]);
//! serve_stdio(server).await
//! # }
//! ```

mod error;
pub mod http_serve;
pub mod protocol;
pub mod serve;
pub mod stdio;

pub use error::{McpError, McpResult};
pub use http_serve::{create_mcp_router, serve_sse, McpHttpState};
pub use protocol::{McpTool, RequestId, ToolCallResult, ToolContent};
pub use serve::{McpServer, McpServerTool, McpServerToolBuilder, McpToolExecutor};
pub use stdio::{serve_lines, serve_stdio};
