//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server binds, accepts connections, reads each request's head, checks
//! the target authority against the blocklist, and dispatches:
//!
//! CONNECT method -> [`tunnel`] handler (opaque byte relay)
//! Other methods  -> [`forward`] handler (plain-HTTP relay)
//!
//! Every failure past `bind` is a per-connection failure: logged, answered on
//! that connection where possible, and never allowed to stop the listener.

use crate::audit;
use crate::blocklist::BlocklistStore;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::filter::RequestFilter;
use crate::forward::{self, Target};
use crate::tunnel;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Maximum total size of HTTP headers (64 KiB). Prevents OOM from
/// malicious clients sending unbounded header data.
const MAX_HEADER_SIZE: usize = 64 * 1024;

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";
const HEADERS_TOO_LARGE_RESPONSE: &[u8] = b"HTTP/1.0 431 Request Header Fields Too Large\r\n\r\n";

/// Handle returned when the proxy server starts.
///
/// Carries the bound port and the graceful-shutdown channel. Shutdown stops
/// the accept loop and signals subscribers (the console); in-flight tunnels
/// drain via their own end-of-stream detection.
pub struct ProxyHandle {
    /// The actual port the proxy is listening on
    pub port: u16,
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyHandle {
    /// Signal the proxy to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A receiver observing the shutdown signal, for tasks that should stop
    /// with the server (the console reader).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    filter: RequestFilter,
    config: ProxyConfig,
    /// Active connection count for connection limiting.
    active_connections: AtomicUsize,
}

impl ProxyState {
    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.idle_timeout_secs)
    }
}

/// Start the proxy server over the given blocklist.
///
/// Binds to `config.bind_addr:config.bind_port` (port 0 = OS-assigned) and
/// begins accepting connections. The store is shared: the command console
/// mutates the same instance the filter reads.
pub async fn start(config: ProxyConfig, store: Arc<BlocklistStore>) -> Result<ProxyHandle> {
    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    let port = local_addr.port();

    info!("proxy listening on {}", local_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(ProxyState {
        filter: RequestFilter::new(store),
        config,
        active_connections: AtomicUsize::new(0),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(ProxyHandle { port, shutdown_tx })
}

/// Accept loop: listen for connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let max = state.config.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("connection limit reached ({}/{}), rejecting {}", current, max, addr);
                                drop(stream);
                                continue;
                            }
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);

                        debug!("accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state).await {
                                debug!("connection handler: {}", e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("proxy server shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(mut stream: TcpStream, state: &ProxyState) -> Result<()> {
    // Read the request line and headers through a BufReader, keeping it
    // alive until the full head is consumed: it may read ahead into the
    // body, and those bytes must not be lost.
    let mut buf_reader = BufReader::new(&mut stream);
    let mut first_line = String::new();
    buf_reader.read_line(&mut first_line).await?;

    if first_line.is_empty() {
        return Ok(()); // Client disconnected
    }

    let mut header_bytes = Vec::new();
    loop {
        let mut line = String::new();
        let n = buf_reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(line.as_bytes());
        if header_bytes.len() > MAX_HEADER_SIZE {
            drop(buf_reader);
            stream.write_all(HEADERS_TOO_LARGE_RESPONSE).await?;
            return Ok(());
        }
    }

    let buffered = buf_reader.buffer().to_vec();
    drop(buf_reader);

    let first_line = first_line.trim_end();
    debug!("request: {}", first_line);

    let Some((method, target, version)) = parse_request_line(first_line) else {
        stream.write_all(BAD_REQUEST_RESPONSE).await?;
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {first_line}"
        )));
    };

    // Resolve the authority the filter matches against: the raw CONNECT
    // authority, or the host[:port] of the absolute-form target.
    let (authority, parsed_target) = if method == "CONNECT" {
        (target.to_string(), None)
    } else {
        match Target::parse(target) {
            Ok(parsed) => (parsed.authority.clone(), Some(parsed)),
            Err(e) => {
                stream.write_all(BAD_REQUEST_RESPONSE).await?;
                return Err(e);
            }
        }
    };

    // Admission check before any forwarding work. The rejection is the
    // expected client-visible outcome; the typed error only feeds the
    // handler's debug log.
    if let Some(token) = state.filter.check(&authority) {
        state.filter.reject(&mut stream, &authority, &token).await?;
        return Err(ProxyError::HostBlocked {
            host: authority,
            token,
        });
    }
    audit::log_allowed(method, &authority);

    match parsed_target {
        None => {
            // `buffered` holds any client bytes read past the header
            // terminator; for CONNECT they belong inside the tunnel.
            tunnel::handle(
                stream,
                &authority,
                &buffered,
                state.connect_timeout(),
                state.idle_timeout(),
            )
            .await
        }
        Some(parsed) => {
            forward::handle(
                &mut stream,
                method,
                version,
                &parsed,
                &header_bytes,
                &buffered,
                state.connect_timeout(),
                state.idle_timeout(),
            )
            .await
        }
    }
}

/// Split a request line into (method, target, version).
fn parse_request_line(line: &str) -> Option<(&str, &str, &str)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    Some((method, target, version))
}
