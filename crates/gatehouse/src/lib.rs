//! Forward HTTP/HTTPS proxy with a runtime-mutable host blocklist.
//!
//! `gatehouse` accepts HTTP/1.x proxy traffic and handles two request kinds:
//!
//! 1. **Plain HTTP** (absolute-form targets) — the request is rewritten to
//!    origin-form, stripped of hop-by-hop and proxy-only headers, replayed to
//!    the origin, and the origin's response is relayed back verbatim.
//!
//! 2. **CONNECT tunnels** — the proxy dials the target, acknowledges the
//!    tunnel, and splices bytes in both directions without decrypting them.
//!
//! Both paths are gated by a shared [`BlocklistStore`] of substring tokens,
//! mutated at runtime by a line-oriented operator console. A token matches a
//! host when the token is a substring of the host, never the reverse.
//!
//! The proxy never terminates TLS, performs no authentication or caching,
//! and keeps no blocklist state across restarts.

pub mod audit;
pub mod blocklist;
pub mod config;
pub mod console;
pub mod error;
pub mod filter;
pub mod forward;
pub mod server;
pub mod tunnel;

pub use blocklist::BlocklistStore;
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use server::{start, ProxyHandle};
