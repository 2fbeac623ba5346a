//! One-shot local HTTP listener for the OAuth redirect.
//!
//! The listener accepts connections until the first `GET /callback` arrives,
//! answers the browser with a small confirmation page, hands the query
//! parameters to the waiting login flow and then releases the port.

use crate::error::AuthResult;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Default port of the redirect URI registered with the Meta app.
pub const DEFAULT_CALLBACK_PORT: u16 = 8888;

/// Path of the redirect URI.
pub const CALLBACK_PATH: &str = "/callback";

/// Upper bound for a single browser request.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// HTML response for successful authorization.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Meta Ads MCP - Authorization Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f0f2f5; color: #1c1e21; }
    .container { text-align: center; padding: 2rem; background: #fff; border-radius: 0.5rem; box-shadow: 0 1px 2px rgba(0,0,0,0.2); }
    h1 { color: #1877f2; margin-bottom: 1rem; }
    p { color: #606770; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Successful</h1>
    <p>Your Meta Ads token is being saved. You can close this window and return to your assistant.</p>
  </div>
  <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#;

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Meta Ads MCP - Authorization Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f0f2f5; color: #1c1e21; }}
    .container {{ text-align: center; padding: 2rem; background: #fff; border-radius: 0.5rem; box-shadow: 0 1px 2px rgba(0,0,0,0.2); }}
    h1 {{ color: #fa383e; margin-bottom: 1rem; }}
    p {{ color: #606770; }}
    .error {{ color: #be1e2d; font-family: monospace; margin-top: 1rem; padding: 1rem; background: rgba(250,56,62,0.08); border-radius: 0.5rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Failed</h1>
    <p>Ask your assistant for a new login link and try again.</p>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// What the browser redirect delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// Authorization code plus the `state` echoed back by Meta.
    Code { code: String, state: String },
    /// Meta (or the user) refused the authorization.
    Error { error: String },
}

/// A running callback listener.
///
/// Consumed by [`CallbackListener::wait`] or [`CallbackListener::shutdown`];
/// both join the accept task so the port is free once they return.
pub struct CallbackListener {
    addr: SocketAddr,
    result_rx: oneshot::Receiver<CallbackResult>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>` and start accepting. Port 0 picks a free port.
    ///
    /// `expected_state` only selects which page the browser sees; the login
    /// flow still validates the state itself.
    pub async fn bind(port: u16, expected_state: impl Into<String>) -> AuthResult<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(accept_loop(
            listener,
            expected_state.into(),
            result_tx,
            shutdown_rx,
        ));

        info!(port = addr.port(), "OAuth callback listener started");

        Ok(Self {
            addr,
            result_rx,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Check whether `port` is free to bind on localhost.
    pub async fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .is_ok()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait up to `timeout` for the callback, then stop the listener.
    ///
    /// Returns `None` on timeout.
    pub async fn wait(mut self, timeout: Duration) -> Option<CallbackResult> {
        let result = match tokio::time::timeout(timeout, &mut self.result_rx).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) => {
                warn!("OAuth callback listener stopped without a result");
                None
            }
            Err(_) => {
                info!(
                    timeout_secs = timeout.as_secs(),
                    "OAuth callback not received in time"
                );
                None
            }
        };

        self.shutdown().await;
        result
    }

    /// Stop accepting and release the port.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "OAuth callback listener task failed");
        }
        debug!(port = self.addr.port(), "OAuth callback listener released port");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("addr", &self.addr)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    expected_state: String,
    result_tx: oneshot::Sender<CallbackResult>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let expected_state = Arc::new(expected_state);
    let mut result_tx = Some(result_tx);
    // Dropped on exit, which aborts connections still being served.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                debug!(%peer, "OAuth callback connection");
                let expected_state = Arc::clone(&expected_state);
                connections.spawn(async move {
                    tokio::time::timeout(
                        CONNECTION_TIMEOUT,
                        handle_connection(stream, &expected_state),
                    )
                    .await
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                match joined {
                    Ok(Ok(Ok(Some(result)))) => {
                        if let Some(tx) = result_tx.take() {
                            let _ = tx.send(result);
                        }
                        break;
                    }
                    Ok(Ok(Ok(None))) => {}
                    Ok(Ok(Err(e))) => warn!(error = %e, "Error handling OAuth callback"),
                    Ok(Err(_)) => warn!("OAuth callback connection timed out"),
                    Err(e) => warn!(error = %e, "OAuth callback connection task failed"),
                }
            }
            _ = &mut shutdown_rx => {
                info!("OAuth callback listener shutting down");
                break;
            }
        }
    }
}

/// Serve one HTTP request. Returns the callback result for `GET /callback`.
async fn handle_connection(
    mut stream: TcpStream,
    expected_state: &str,
) -> AuthResult<Option<CallbackResult>> {
    let mut buffer = [0u8; 8192];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        respond(&mut stream, 400, "text/plain", "Bad Request").await;
        return Ok(None);
    }

    let (method, target) = (parts[0], parts[1]);

    let parsed = match url::Url::parse(&format!("http://localhost{target}")) {
        Ok(u) => u,
        Err(_) => {
            respond(&mut stream, 400, "text/plain", "Invalid URL").await;
            return Ok(None);
        }
    };

    if parsed.path() != CALLBACK_PATH {
        respond(&mut stream, 404, "text/plain", "Not Found").await;
        return Ok(None);
    }

    if method != "GET" {
        respond(&mut stream, 405, "text/plain", "Method Not Allowed").await;
        return Ok(None);
    }

    let params: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    debug!(
        has_code = params.contains_key("code"),
        has_state = params.contains_key("state"),
        error = ?params.get("error"),
        "Received OAuth callback"
    );

    if let Some(err) = params.get("error") {
        let message = params
            .get("error_description")
            .or_else(|| params.get("error_reason"))
            .cloned()
            .unwrap_or_else(|| err.clone());
        respond(&mut stream, 200, "text/html", &html_error(&message)).await;
        return Ok(Some(CallbackResult::Error { error: message }));
    }

    let Some(code) = params.get("code").cloned() else {
        let message = "No authorization code provided";
        respond(&mut stream, 400, "text/html", &html_error(message)).await;
        return Ok(Some(CallbackResult::Error {
            error: message.to_string(),
        }));
    };

    let state = params.get("state").cloned().unwrap_or_default();
    if state == expected_state {
        respond(&mut stream, 200, "text/html", HTML_SUCCESS).await;
    } else {
        warn!("OAuth callback with invalid state");
        let html = html_error("Invalid or expired state parameter - potential CSRF attack");
        respond(&mut stream, 400, "text/html", &html).await;
    }

    Ok(Some(CallbackResult::Code { code, state }))
}

async fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let response = http_response(status, content_type, body);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to write OAuth callback response");
    }
    let _ = stream.shutdown().await;
}

/// Build an HTTP response.
fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Unknown",
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    )
}
