//! Error types for the gatehouse proxy.

use thiserror::Error;

/// Errors that can occur while serving proxy traffic.
///
/// Everything except [`ProxyError::Bind`] is a per-connection failure:
/// the connection handler logs it and the listener keeps serving.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("host {host} blocked by token {token:?}")]
    HostBlocked { host: String, token: String },

    #[error("upstream connection failed to {host}: {reason}")]
    UpstreamConnect { host: String, reason: String },

    #[error("upstream exchange failed for {host}: {reason}")]
    UpstreamExchange { host: String, reason: String },

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("malformed console command: {0:?}")]
    MalformedCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
