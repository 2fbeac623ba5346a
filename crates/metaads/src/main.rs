//! meta-ads-mcp - Meta Ads API tools for LLM clients.
//!
//! This is the main entry point: it loads configuration, picks the auth
//! provider, optionally logs in, and serves the tools over MCP.

mod config;
mod logging;

use clap::{Parser, ValueEnum};
use config::{Config, ConfigLayer};
use logging::LogTarget;
use metaads_auth::{
    run_login, AuthOutcome, AuthProvider, LoginMode, MetaOAuthProvider, PipeboardBroker,
    ProviderKind, TokenCache,
};
use metaads_graph::{tools::all_tools, Dispatcher, GraphClient};
use metaads_mcp::{serve_sse, serve_stdio, McpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const SERVER_NAME: &str = "meta-ads";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const INSTRUCTIONS: &str = "Tools for reading and managing Meta (Facebook/Instagram) ad accounts, \
campaigns, ad sets, ads and insights. If a tool returns 'Authentication required', show the \
markdown_link to the user, wait for them to log in, then retry. Use get_login_link to log in ahead of time.";

#[derive(Parser)]
#[command(name = "meta-ads-mcp")]
#[command(author, version, about = "MCP server for the Meta Ads API", long_about = None)]
struct Cli {
    /// Meta App ID (overrides META_APP_ID)
    #[arg(long)]
    app_id: Option<String>,

    /// Authenticate at startup when no token is cached
    #[arg(long)]
    login: bool,

    /// Clear the cached token and authenticate at startup
    #[arg(long)]
    force_login: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// MCP transport
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Address to bind to with the SSE transport
    #[arg(long, default_value = "127.0.0.1:8080")]
    address: SocketAddr,

    /// Print login links instead of opening a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP with Server-Sent Events
    Sse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_target = match cli.transport {
        Transport::Stdio => LogTarget::File,
        Transport::Sse => LogTarget::Stderr,
    };
    let log_file = logging::init(cli.verbose, log_target);

    let config = Config::load(ConfigLayer {
        app_id: cli.app_id.clone(),
        ..Default::default()
    })
    .await?;
    info!(version = VERSION, provider = %config.provider_kind(), ?config, "Starting meta-ads-mcp");

    let auth = build_provider(&config)?;
    let graph = GraphClient::new(&config.graph_api_version)?;

    let mut dispatcher = Dispatcher::new(Arc::clone(&auth), graph);
    if !cli.no_browser {
        dispatcher = dispatcher.with_browser_opener(Arc::new(open_browser));
    }
    let dispatcher = Arc::new(dispatcher);

    if cli.login || cli.force_login {
        startup_login(auth.as_ref(), cli.force_login, !cli.no_browser).await;
    }

    let server = McpServer::new(SERVER_NAME, VERSION)
        .with_instructions(INSTRUCTIONS)
        .with_tools(dispatcher.mcp_tools(all_tools()));
    info!(tools = server.tool_count(), transport = ?cli.transport, "Serving MCP");

    let result = match cli.transport {
        Transport::Stdio => serve_stdio(server).await.map_err(anyhow::Error::from),
        Transport::Sse => {
            eprintln!("meta-ads-mcp listening on http://{}/sse", cli.address);
            serve_sse(server, cli.address)
                .await
                .map_err(anyhow::Error::from)
        }
    };

    if let Some(path) = log_file {
        eprintln!("Logs: {}", path.display());
    }

    result
}

/// Broker when a Pipeboard token is configured, direct OAuth otherwise.
fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn AuthProvider>> {
    let kind = config.provider_kind();
    let cache = TokenCache::for_provider(kind)?;

    let provider: Arc<dyn AuthProvider> = match (kind, config.pipeboard_config()) {
        (ProviderKind::Broker, Some(pipeboard)) => Arc::new(PipeboardBroker::new(pipeboard, cache)),
        _ => {
            if config.app_id.is_none() {
                warn!("No Meta App ID configured; set META_APP_ID or pass --app-id to enable login");
            }
            Arc::new(MetaOAuthProvider::new(config.oauth_config(), cache))
        }
    };
    Ok(provider)
}

fn open_browser(url: &str) {
    if let Err(e) = open::that_detached(url) {
        warn!(error = %e, "Could not open browser");
    }
}

/// Log in before serving. Failures are reported and the server starts anyway.
async fn startup_login(auth: &dyn AuthProvider, force: bool, browser: bool) {
    if force {
        info!("Clearing cached token for forced login");
        if let Err(e) = auth.invalidate().await {
            warn!(error = %e, "Failed to clear token cache");
        }
    } else if let Some(credential) = auth.cached_credential().await {
        if !credential.is_expired() {
            info!("Using cached access token");
            eprintln!("Already authenticated with Meta Ads.");
            return;
        }
    }

    let result = run_login(auth, LoginMode::Startup, |prompt| {
        eprintln!(
            "Open this link to authenticate with Meta Ads:\n\n  {}\n",
            prompt.login_url
        );
        if browser {
            open_browser(&prompt.login_url);
        }
    })
    .await;

    match result {
        Ok(AuthOutcome::Obtained(_)) => {
            info!("Startup login completed");
            eprintln!("Authentication successful.");
        }
        Ok(AuthOutcome::TimedOut) => {
            warn!("Startup login timed out");
            eprintln!("Authentication timed out. Tools will return a login link when needed.");
        }
        Ok(AuthOutcome::Failed(reason)) => {
            error!(%reason, "Startup login failed");
            eprintln!("Authentication failed: {reason}");
        }
        Err(e) => {
            error!(error = %e, "Could not start login");
            eprintln!("Could not start authentication: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["meta-ads-mcp"]);
        assert_eq!(cli.transport, Transport::Stdio);
        assert_eq!(cli.address, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!(!cli.login && !cli.force_login && !cli.no_browser);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "meta-ads-mcp",
            "--app-id",
            "1234",
            "--force-login",
            "--transport",
            "sse",
            "--address",
            "0.0.0.0:9000",
            "--no-browser",
        ]);
        assert_eq!(cli.app_id.as_deref(), Some("1234"));
        assert!(cli.force_login);
        assert_eq!(cli.transport, Transport::Sse);
        assert_eq!(cli.address.port(), 9000);
        assert!(cli.no_browser);
    }

    #[test]
    fn test_cli_rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["meta-ads-mcp", "--transport", "websocket"]).is_err());
    }
}
