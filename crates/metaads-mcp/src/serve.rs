//! Tool registry and JSON-RPC request handling shared by all transports.
//!
//! ```text
//! ┌─────────────────┐   stdio / HTTP+SSE   ┌──────────────────┐
//! │   MCP client    │ ◄──────────────────► │    McpServer     │
//! │  (LLM host)     │                      │ (request router) │
//! └─────────────────┘                      └──────────────────┘
//!                                                   │
//!                                                   ▼
//!                                          ┌──────────────────┐
//!                                          │  McpServerTool   │
//!                                          │ (Meta Ads tools) │
//!                                          └──────────────────┘
//! ```

use crate::protocol::{
    CallToolParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    RequestId, ServerCapabilities, ServerInfo, ToolCallResult, ToolContent, ToolsCapability,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tool definition for the MCP server.
#[derive(Clone)]
pub struct McpServerTool {
    pub name: String,
    pub description: String,
    /// JSON Schema for parameters.
    pub parameters: Value,
    pub executor: Arc<dyn McpToolExecutor>,
}

impl std::fmt::Debug for McpServerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Trait for tool execution.
///
/// `Err` carries the text of an error result (`isError: true`), not a
/// JSON-RPC error.
#[async_trait::async_trait]
pub trait McpToolExecutor: Send + Sync {
    async fn execute(&self, args: Value) -> Result<Vec<ToolContent>, String>;
}

/// Builder for McpServerTool.
pub struct McpServerToolBuilder {
    name: String,
    description: String,
    parameters: Value,
}

impl McpServerToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build the tool with an executor.
    pub fn build(self, executor: impl McpToolExecutor + 'static) -> McpServerTool {
        McpServerTool {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            executor: Arc::new(executor),
        }
    }
}

/// Executor wrapping a closure that returns text.
#[cfg(test)]
pub(crate) struct ClosureExecutor<F>
where
    F: Fn(Value) -> Result<String, String> + Send + Sync,
{
    f: F,
}

#[cfg(test)]
impl<F> ClosureExecutor<F>
where
    F: Fn(Value) -> Result<String, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl<F> McpToolExecutor for ClosureExecutor<F>
where
    F: Fn(Value) -> Result<String, String> + Send + Sync,
{
    async fn execute(&self, args: Value) -> Result<Vec<ToolContent>, String> {
        (self.f)(args).map(|text| vec![ToolContent::text(text)])
    }
}

/// Transport-independent MCP server.
#[derive(Clone)]
pub struct McpServer {
    pub name: String,
    pub version: String,
    /// Tools in registration order.
    tools: Arc<Vec<McpServerTool>>,
    index: Arc<HashMap<String, usize>>,
    instructions: Option<String>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Arc::new(Vec::new()),
            index: Arc::new(HashMap::new()),
            instructions: None,
        }
    }

    /// Register tools. A later tool with the same name replaces the earlier one.
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = McpServerTool>) -> Self {
        let mut list: Vec<McpServerTool> = self.tools.as_ref().clone();
        let mut index: HashMap<String, usize> = self.index.as_ref().clone();
        for tool in tools {
            match index.get(&tool.name) {
                Some(&pos) => list[pos] = tool,
                None => {
                    index.insert(tool.name.clone(), list.len());
                    list.push(tool);
                }
            }
        }
        self.tools = Arc::new(list);
        self.index = Arc::new(index);
        self
    }

    /// Usage notes sent to the client on `initialize`.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn tool(&self, name: &str) -> Option<&McpServerTool> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    /// Handle one raw JSON-RPC message.
    ///
    /// Malformed JSON yields a parse error with a null id.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to parse MCP message");
                return Some(JsonRpcResponse::error(None, PARSE_ERROR, "Parse error"));
            }
        };

        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!(error = %e, "Invalid MCP request");
                Some(JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid Request"))
            }
        }
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "Handling MCP request");

        // Notifications (no id) don't expect a response
        let Some(id) = request.id else {
            match request.method.as_str() {
                "notifications/initialized" => debug!("Received initialized notification"),
                _ => debug!(method = %request.method, "Received unknown notification"),
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(Some(id), serde_json::json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            _ => JsonRpcResponse::error(Some(id), METHOD_NOT_FOUND, "Method not found"),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        info!(name = %self.name, version = %self.version, "Initializing MCP server");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: Some(self.version.clone()),
            },
            instructions: self.instructions.clone(),
        };

        to_response(id, &result)
    }

    fn handle_list_tools(&self, id: RequestId) -> JsonRpcResponse {
        debug!(count = self.tools.len(), "Listing MCP tools");

        let tools: Vec<McpTool> = self
            .tools
            .iter()
            .map(|tool| McpTool {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: Some(tool.parameters.clone()),
            })
            .collect();

        to_response(id, &ListToolsResult { tools })
    }

    async fn handle_call_tool(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    Some(id),
                    INVALID_PARAMS,
                    format!("Invalid params: {e}"),
                );
            }
            None => return JsonRpcResponse::error(Some(id), INVALID_PARAMS, "Missing params"),
        };

        debug!(tool = %params.name, "Calling MCP tool");

        let Some(tool) = self.tool(&params.name) else {
            return JsonRpcResponse::error(
                Some(id),
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        let args = params
            .arguments
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let tool_result = match tool.executor.execute(args).await {
            Ok(content) => {
                debug!(tool = %params.name, items = content.len(), "Tool completed successfully");
                ToolCallResult::ok(content)
            }
            Err(e) => {
                warn!(tool = %params.name, "Tool returned an error result");
                ToolCallResult::error_text(e)
            }
        };

        to_response(id, &tool_result)
    }
}

fn to_response<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(Some(id), value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            INTERNAL_ERROR,
            format!("Failed to serialize result: {e}"),
        ),
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish()
    }
}
