//! Operator command console.
//!
//! A single long-lived reader over a line-oriented text channel (stdin in the
//! binary) that mutates the shared blocklist for the process lifetime.
//!
//! The grammar is preserved from the legacy proxy: the payload is every
//! character from byte index 3 onward, whatever occupies the first three
//! characters, and the command is recognized by the substring `/b` (block)
//! or `/u` (unblock) anywhere in the line, `/b` checked first. So
//! `/b example.com` blocks `example.com`, and so does `xx/bexample.com`.
//! Lines shorter than three bytes are malformed and are logged and dropped
//! instead of crashing the reader.

use crate::blocklist::BlocklistStore;
use crate::error::{ProxyError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Append the payload to the blocklist.
    Block(String),
    /// Remove the first blocklist entry matching the payload host.
    Unblock(String),
    /// A well-formed line that names no command; ignored.
    Unknown,
}

/// Parse one console line.
///
/// Validates length and UTF-8 boundary before slicing the payload; the
/// legacy fixed-offset slice panicked on short input.
pub fn parse_command(line: &str) -> Result<Command> {
    if line.len() < 3 {
        return Err(ProxyError::MalformedCommand(line.to_string()));
    }
    let payload = line
        .get(3..)
        .ok_or_else(|| ProxyError::MalformedCommand(line.to_string()))?;

    if line.contains("/b") {
        Ok(Command::Block(payload.to_string()))
    } else if line.contains("/u") {
        Ok(Command::Unblock(payload.to_string()))
    } else {
        Ok(Command::Unknown)
    }
}

/// Run the console reader until EOF or shutdown.
///
/// Generic over the line source so tests can drive it with in-memory bytes;
/// the binary passes buffered stdin. Malformed lines are contained here:
/// logged, discarded, and the reader keeps going.
pub async fn run<R>(
    reader: R,
    store: Arc<BlocklistStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("console input closed");
                        return;
                    }
                    Err(e) => {
                        warn!("console read error: {}", e);
                        return;
                    }
                };
                apply(&line, &store);
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("console shutting down");
                    return;
                }
            }
        }
    }
}

/// Apply one console line to the store.
fn apply(line: &str, store: &BlocklistStore) {
    match parse_command(line) {
        Ok(Command::Block(token)) => {
            info!(token = %token, "console: blocking");
            store.block(token);
        }
        Ok(Command::Unblock(host)) => {
            info!(host = %host, "console: unblocking");
            store.unblock(&host);
        }
        Ok(Command::Unknown) => {
            debug!(line = %line, "console: no command in line, ignoring");
        }
        Err(e) => {
            warn!("console: {}", e);
        }
    }
}
