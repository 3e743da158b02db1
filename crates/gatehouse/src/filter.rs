//! Request admission against the shared blocklist.
//!
//! The filter is consulted with the request's target authority before any
//! forwarding work happens. The candidate string is the authority exactly as
//! the client sent it (`host` or `host:port`), matching the legacy behavior
//! of testing tokens against the parsed request host field.

use crate::audit;
use crate::blocklist::BlocklistStore;
use crate::error::Result;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Literal response written to clients whose target host is blocklisted.
pub const FORBIDDEN_RESPONSE: &[u8] = b"HTTP/1.0 403 FORBIDDEN\r\n\r\n";

/// Admission check over a shared [`BlocklistStore`].
#[derive(Debug, Clone)]
pub struct RequestFilter {
    store: Arc<BlocklistStore>,
}

impl RequestFilter {
    /// Create a filter reading from the given store.
    #[must_use]
    pub fn new(store: Arc<BlocklistStore>) -> Self {
        Self { store }
    }

    /// Check a target authority against the blocklist.
    ///
    /// Returns the offending token when the authority is blocked, `None`
    /// when the request may be forwarded.
    #[must_use]
    pub fn check(&self, authority: &str) -> Option<String> {
        self.store.matched_token(authority)
    }

    /// Write the literal rejection response and log the decision.
    ///
    /// No upstream contact is attempted for a rejected request; the caller
    /// drops the connection (and with it any unread request body) afterwards.
    pub async fn reject<W>(&self, client: &mut W, authority: &str, token: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        audit::log_denied(authority, token);
        client.write_all(FORBIDDEN_RESPONSE).await?;
        client.flush().await?;
        Ok(())
    }
}
