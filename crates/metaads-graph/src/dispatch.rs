//! Token resolution and auth handling in front of every tool.
//!
//! The dispatcher never lets a tool run without a token. When no token is
//! available it starts (or reuses) a login, keeps a background waiter alive
//! so the callback or broker poll can complete, and returns an
//! authentication-required result carrying the login link.

use crate::error::{GraphError, ToolError, ToolResult};
use crate::{to_pretty, BoxedTool, GraphClient, Tool, ToolContext, ToolOutput};
use metaads_auth::{AuthOutcome, AuthProvider, LoginMode};
use metaads_mcp::{McpServerTool, McpServerToolBuilder, McpToolExecutor, ToolContent};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opens a login URL for the user.
pub type BrowserOpener = Arc<dyn Fn(&str) + Send + Sync>;

/// Name of the tool that hands out a login link.
pub const LOGIN_LINK_TOOL: &str = "get_login_link";

/// Background task waiting on one login.
struct LoginWaiter {
    login_url: String,
    handle: JoinHandle<()>,
}

struct ResolvedToken {
    token: String,
    from_cache: bool,
}

/// Runs tools with a resolved access token.
pub struct Dispatcher {
    auth: Arc<dyn AuthProvider>,
    graph: GraphClient,
    opener: Option<BrowserOpener>,
    waiter: Mutex<Option<LoginWaiter>>,
}

impl Dispatcher {
    pub fn new(auth: Arc<dyn AuthProvider>, graph: GraphClient) -> Self {
        Self {
            auth,
            graph,
            opener: None,
            waiter: Mutex::new(None),
        }
    }

    /// Open login links in a browser when a new login starts.
    pub fn with_browser_opener(mut self, opener: BrowserOpener) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Execute `tool` with a token from the arguments or the cache.
    pub async fn run(&self, tool: &dyn Tool, args: Value) -> ToolResult<ToolOutput> {
        let resolved = self.resolve_token(&args).await?;
        let ctx = ToolContext {
            graph: self.graph.clone(),
            access_token: resolved.token,
        };

        debug!(tool = tool.id(), from_cache = resolved.from_cache, "Running tool");
        match tool.execute(args, &ctx).await {
            Err(ToolError::Graph(GraphError::AuthExpired { message })) if resolved.from_cache => {
                warn!(tool = tool.id(), %message, "Cached access token rejected, clearing it");
                if let Err(e) = self.auth.invalidate().await {
                    warn!(error = %e, "Failed to clear token cache");
                }
                Err(self
                    .login_required(format!("Access token expired or invalid: {message}"))
                    .await)
            }
            other => other,
        }
    }

    async fn resolve_token(&self, args: &Value) -> ToolResult<ResolvedToken> {
        let explicit = args
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = explicit {
            return Ok(ResolvedToken {
                token: token.to_string(),
                from_cache: false,
            });
        }

        match self.auth.cached_credential().await {
            Some(credential) => Ok(ResolvedToken {
                token: credential.access_token,
                from_cache: true,
            }),
            None => Err(self.login_required("No valid access token found").await),
        }
    }

    /// Start or reuse a login and describe it as an error result.
    pub async fn login_required(&self, reason: impl Into<String>) -> ToolError {
        let reason = reason.into();
        match self.auth.start_login().await {
            Ok(prompt) => {
                self.spawn_waiter(&prompt.login_url).await;
                ToolError::AuthRequired {
                    reason,
                    prompt: Some(prompt),
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not start login");
                ToolError::AuthRequired {
                    reason: format!("{reason}. {e}"),
                    prompt: None,
                }
            }
        }
    }

    /// Keep one background waiter per login so the flow can finish while
    /// the client shows the link. A new login URL always gets its own waiter.
    async fn spawn_waiter(&self, login_url: &str) {
        let mut waiter = self.waiter.lock().await;
        let same_login = waiter.as_ref().is_some_and(|w| w.login_url == login_url);
        if same_login && waiter.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let auth = Arc::clone(&self.auth);
        let handle = tokio::spawn(async move {
            match auth.await_login(LoginMode::Tool).await {
                AuthOutcome::Obtained(credential) => {
                    info!(provider = %credential.provider, "Login completed")
                }
                AuthOutcome::TimedOut => info!("Login not completed in time"),
                AuthOutcome::Failed(reason) => warn!(%reason, "Login failed"),
            }
        });
        *waiter = Some(LoginWaiter {
            login_url: login_url.to_string(),
            handle,
        });

        if !same_login {
            if let Some(open) = &self.opener {
                open(login_url);
            }
        }
    }

    /// Result of the `get_login_link` tool.
    pub async fn login_link(&self) -> ToolResult<ToolOutput> {
        if let Some(credential) = self.auth.cached_credential().await {
            if !credential.is_expired() {
                return Ok(ToolOutput::Json(json!({
                    "message": "Already authenticated",
                    "token_status": "valid",
                    "provider": credential.provider.as_str(),
                    "expires_in": credential.expires_in_secs(),
                    "note": "No login needed. Call get_login_link again after the token is rejected to log in anew.",
                })));
            }
        }

        match self.login_required("Login requested").await {
            ToolError::AuthRequired {
                prompt: Some(prompt),
                ..
            } => Ok(ToolOutput::Json(json!({
                "message": "Click the link below to authenticate with Meta Ads",
                "login_url": prompt.login_url,
                "markdown_link": format!("[Click here to authenticate with Meta Ads]({})", prompt.login_url),
                "expires_in": prompt.expires_in,
                "instructions": "Present the link to the user as clickable Markdown using markdown_link. \
                    After approving access in the browser, retry the original request.",
            }))),
            other => Err(other),
        }
    }

    /// Wrap `tools` plus the login link tool as MCP tools.
    pub fn mcp_tools(self: &Arc<Self>, tools: Vec<BoxedTool>) -> Vec<McpServerTool> {
        let mut mcp_tools: Vec<McpServerTool> = tools
            .into_iter()
            .map(|tool| {
                McpServerToolBuilder::new(tool.id())
                    .description(tool.description())
                    .parameters(tool.parameters_schema())
                    .build(ToolExecutor {
                        dispatcher: Arc::clone(self),
                        tool,
                    })
            })
            .collect();

        mcp_tools.push(
            McpServerToolBuilder::new(LOGIN_LINK_TOOL)
                .description(
                    "Get a clickable login link for Meta Ads authentication. \
                     Reports when a valid token is already cached.",
                )
                .parameters(json!({ "type": "object", "properties": {} }))
                .build(LoginLinkExecutor {
                    dispatcher: Arc::clone(self),
                }),
        );
        mcp_tools
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.auth.kind())
            .field("graph", &self.graph.base_url())
            .finish()
    }
}

fn into_mcp(result: ToolResult<ToolOutput>) -> Result<Vec<ToolContent>, String> {
    match result {
        Ok(output) => Ok(output.into_content()),
        Err(e) => {
            debug!(error = %e, "Tool returned an error result");
            Err(to_pretty(&e.to_payload()))
        }
    }
}

struct ToolExecutor {
    dispatcher: Arc<Dispatcher>,
    tool: BoxedTool,
}

#[async_trait::async_trait]
impl McpToolExecutor for ToolExecutor {
    async fn execute(&self, args: Value) -> Result<Vec<ToolContent>, String> {
        into_mcp(self.dispatcher.run(self.tool.as_ref(), args).await)
    }
}

struct LoginLinkExecutor {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait::async_trait]
impl McpToolExecutor for LoginLinkExecutor {
    async fn execute(&self, _args: Value) -> Result<Vec<ToolContent>, String> {
        into_mcp(self.dispatcher.login_link().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metaads_auth::{AuthResult, Credential, LoginPrompt, ProviderKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeAuth {
        credential: std::sync::Mutex<Option<Credential>>,
        login_url: std::sync::Mutex<Option<String>>,
        starts: AtomicUsize,
        waits: AtomicUsize,
        invalidations: AtomicUsize,
    }

    impl FakeAuth {
        fn with_token(token: &str) -> Self {
            let auth = Self::default();
            *auth.credential.lock().unwrap() = Some(Credential::new(token, ProviderKind::Direct));
            auth
        }
    }

    #[async_trait]
    impl AuthProvider for FakeAuth {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Direct
        }

        async fn cached_credential(&self) -> Option<Credential> {
            self.credential.lock().unwrap().clone()
        }

        async fn start_login(&self) -> AuthResult<LoginPrompt> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let login_url = self
                .login_url
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "https://login.example/dialog".to_string());
            Ok(LoginPrompt {
                login_url,
                redirect_uri: None,
                expires_in: 180,
            })
        }

        async fn await_login(&self, _mode: LoginMode) -> AuthOutcome {
            self.waits.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            AuthOutcome::TimedOut
        }

        async fn invalidate(&self) -> AuthResult<()> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            *self.credential.lock().unwrap() = None;
            Ok(())
        }
    }

    struct EchoTokenTool;

    #[async_trait]
    impl Tool for EchoTokenTool {
        fn id(&self) -> &str {
            "echo_token"
        }

        fn description(&self) -> &str {
            "Echo the resolved token"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
            Ok(ToolOutput::Json(json!({ "token": ctx.access_token })))
        }
    }

    struct RejectedTool;

    #[async_trait]
    impl Tool for RejectedTool {
        fn id(&self) -> &str {
            "rejected"
        }

        fn description(&self) -> &str {
            "Always rejected by Meta"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult<ToolOutput> {
            Err(GraphError::AuthExpired {
                message: "Session has expired".to_string(),
            }
            .into())
        }
    }

    fn dispatcher(auth: Arc<FakeAuth>) -> Dispatcher {
        Dispatcher::new(auth, GraphClient::with_base_url("http://127.0.0.1:9").unwrap())
    }

    #[tokio::test]
    async fn test_explicit_token_wins() {
        let auth = Arc::new(FakeAuth::with_token("cached"));
        let output = dispatcher(auth)
            .run(&EchoTokenTool, json!({"access_token": "explicit"}))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"token": "explicit"})));
    }

    #[tokio::test]
    async fn test_cached_token_used() {
        let auth = Arc::new(FakeAuth::with_token("cached"));
        let output = dispatcher(auth).run(&EchoTokenTool, json!({})).await.unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"token": "cached"})));
    }

    #[tokio::test]
    async fn test_no_token_requires_login_and_spawns_one_waiter() {
        let auth = Arc::new(FakeAuth::default());
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let dispatcher = dispatcher(Arc::clone(&auth)).with_browser_opener(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..2 {
            let err = dispatcher.run(&EchoTokenTool, json!({})).await.unwrap_err();
            match err {
                ToolError::AuthRequired { prompt, .. } => {
                    assert_eq!(prompt.unwrap().login_url, "https://login.example/dialog")
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(auth.starts.load(Ordering::SeqCst), 2);
        assert_eq!(auth.waits.load(Ordering::SeqCst), 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_login_url_gets_its_own_waiter() {
        let auth = Arc::new(FakeAuth::default());
        let opened = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&opened);
        let dispatcher = dispatcher(Arc::clone(&auth)).with_browser_opener(Arc::new(move |url| {
            log.lock().unwrap().push(url.to_string());
        }));

        dispatcher.run(&EchoTokenTool, json!({})).await.unwrap_err();
        *auth.login_url.lock().unwrap() = Some("https://login.example/second".to_string());
        dispatcher.run(&EchoTokenTool, json!({})).await.unwrap_err();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(auth.waits.load(Ordering::SeqCst), 2);
        assert_eq!(
            *opened.lock().unwrap(),
            vec![
                "https://login.example/dialog".to_string(),
                "https://login.example/second".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_cached_token_is_invalidated() {
        let auth = Arc::new(FakeAuth::with_token("X"));
        let err = dispatcher(Arc::clone(&auth))
            .run(&RejectedTool, json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::AuthRequired { prompt: Some(_), .. }));
        assert_eq!(auth.invalidations.load(Ordering::SeqCst), 1);
        assert!(auth.cached_credential().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_explicit_token_keeps_cache() {
        let auth = Arc::new(FakeAuth::with_token("cached"));
        let err = dispatcher(Arc::clone(&auth))
            .run(&RejectedTool, json!({"access_token": "bad"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Graph(GraphError::AuthExpired { .. })));
        assert_eq!(auth.invalidations.load(Ordering::SeqCst), 0);
        assert!(auth.cached_credential().await.is_some());
    }

    #[tokio::test]
    async fn test_login_link_when_authenticated() {
        let auth = Arc::new(FakeAuth::with_token("cached"));
        let output = dispatcher(Arc::clone(&auth)).login_link().await.unwrap();
        match output {
            ToolOutput::Json(value) => assert_eq!(value["message"], "Already authenticated"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(auth.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_link_without_token() {
        let auth = Arc::new(FakeAuth::default());
        let output = dispatcher(auth).login_link().await.unwrap();
        match output {
            ToolOutput::Json(value) => {
                assert_eq!(value["login_url"], "https://login.example/dialog");
                assert!(value["markdown_link"]
                    .as_str()
                    .unwrap()
                    .starts_with("[Click here"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mcp_tools_include_login_link() {
        let dispatcher = Arc::new(dispatcher(Arc::new(FakeAuth::default())));
        let tools = dispatcher.mcp_tools(vec![Arc::new(EchoTokenTool)]);
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo_token", LOGIN_LINK_TOOL]);
    }

    #[tokio::test]
    async fn test_error_result_is_pretty_payload() {
        let dispatcher = Arc::new(dispatcher(Arc::new(FakeAuth::default())));
        let tools = dispatcher.mcp_tools(vec![Arc::new(EchoTokenTool)]);
        let text = tools[0].executor.execute(json!({})).await.unwrap_err();
        let payload: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(payload["error"], "Authentication required");
        assert_eq!(payload["login_url"], "https://login.example/dialog");
    }
}
