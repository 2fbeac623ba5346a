//! Transport errors.
//!
//! Request-level problems (bad JSON, unknown methods, failing tools) are
//! answered in-band as JSON-RPC errors and never surface here. These errors
//! end a transport loop.

use std::net::SocketAddr;
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// The SSE listener could not bind its address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the transport failed.
    #[error("Transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be encoded.
    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}
