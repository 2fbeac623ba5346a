//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! Stdout carries protocol messages only; all logging must go elsewhere.

use crate::error::McpResult;
use crate::serve::McpServer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Serve MCP on the process's stdin and stdout until stdin closes.
pub async fn serve_stdio(server: McpServer) -> McpResult<()> {
    serve_lines(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve MCP over any line-oriented byte stream pair.
pub async fn serve_lines<R, W>(server: McpServer, reader: R, mut writer: W) -> McpResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(name = %server.name, tools = server.tool_count(), "MCP stdio server started");

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        debug!(bytes = line.len(), "MCP message received");
        if let Some(response) = server.handle_message(line).await {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
    }

    info!("MCP stdio input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcResponse, RequestId, PARSE_ERROR};
    use crate::serve::tests::echo_server;

    async fn run(input: &str) -> Vec<JsonRpcResponse> {
        let mut output = Vec::new();
        serve_lines(echo_server(), input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_session() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":"two","method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
            "\n",
        );

        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, Some(RequestId::Number(1)));
        assert_eq!(responses[1].id, Some(RequestId::String("two".to_string())));
        assert_eq!(
            responses[1].result.as_ref().unwrap()["content"][0]["text"],
            "hi"
        );
    }

    #[tokio::test]
    async fn test_parse_error_does_not_stop_loop() {
        let input = "garbage\n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n";

        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0].id.is_none());
        assert_eq!(responses[0].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(responses[1].id, Some(RequestId::Number(3)));
    }
}
