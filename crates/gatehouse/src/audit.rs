//! Audit logging for proxy decisions.
//!
//! Logs filter decisions and tunnel lifecycle events with structured fields
//! via `tracing`. Request bodies and tunneled bytes are never logged.

use tracing::info;

/// Log an admitted request.
pub fn log_allowed(method: &str, authority: &str) {
    info!(
        target: "gatehouse::audit",
        method = method,
        authority = authority,
        decision = "allow",
        "request admitted"
    );
}

/// Log a request rejected by the blocklist, naming the offending token.
pub fn log_denied(authority: &str, token: &str) {
    info!(
        target: "gatehouse::audit",
        authority = authority,
        token = token,
        decision = "deny",
        "request refused, host is blocklisted"
    );
}

/// Log the closure of a CONNECT tunnel. Emitted by exactly one splice
/// direction per tunnel.
pub fn log_tunnel_closed(authority: &str) {
    info!(
        target: "gatehouse::audit",
        authority = authority,
        "tunnel closed"
    );
}
