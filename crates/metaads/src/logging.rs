//! Log setup.
//!
//! In stdio mode stdout carries MCP traffic, so logs go to an append-only file
//! in the platform log directory. In SSE mode they go to stderr.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "meta-ads-mcp";
const LOG_FILE_NAME: &str = "meta-ads-mcp.log";

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    File,
    Stderr,
}

fn filter_directives(verbose: bool) -> &'static str {
    if verbose {
        "meta_ads_mcp=debug,metaads_auth=debug,metaads_graph=debug,metaads_mcp=debug,tower_http=debug"
    } else {
        "meta_ads_mcp=info,metaads_auth=info,metaads_graph=info,metaads_mcp=info"
    }
}

/// `RUST_LOG` wins over the built-in directives.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(verbose)))
}

/// Initialize logging. Returns the log file path when logging to a file.
pub fn init(verbose: bool, target: LogTarget) -> Option<PathBuf> {
    if target == LogTarget::Stderr {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(verbose))
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .init();
        return None;
    }

    let log_dir = log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return None;
    }

    let log_file = log_dir.join(LOG_FILE_NAME);
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            return None;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false)
        .with_ansi(false)
        .with_writer(file)
        .init();

    Some(log_file)
}

/// Platform log directory.
pub fn log_dir() -> PathBuf {
    // macOS: ~/Library/Logs/meta-ads-mcp
    // Linux: ~/.local/state/meta-ads-mcp/logs
    // Windows: %LOCALAPPDATA%/meta-ads-mcp/logs

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library/Logs").join(APP_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(state_dir) = dirs::state_dir() {
            return state_dir.join(APP_NAME).join("logs");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".local/state").join(APP_NAME).join("logs");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app) = dirs::data_local_dir() {
            return local_app.join(APP_NAME).join("logs");
        }
    }

    PathBuf::from(format!(".{APP_NAME}/logs"))
}
