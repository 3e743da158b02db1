//! Plain-HTTP forwarding (non-CONNECT requests).
//!
//! Proxy clients send absolute-form targets (`GET http://host/path HTTP/1.1`).
//! The forwarder rewrites the request to origin-form, strips the headers that
//! are meaningful only on the client-proxy leg, replays the request to the
//! origin over a fresh TCP connection, and streams the origin's response back
//! verbatim.
//!
//! An upstream failure is isolated to the one request: the client receives a
//! literal 502 and the listener keeps serving every other connection.

use crate::error::{ProxyError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Literal response for any failed upstream exchange.
pub const BAD_GATEWAY_RESPONSE: &[u8] = b"HTTP/1.0 502 Bad Gateway\r\n\r\n";

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";

/// Maximum request body size (16 MiB). Prevents OOM from a malicious
/// Content-Length.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Headers that must never reach the origin: `Connection` is hop-by-hop,
/// the `Proxy-*` trio is meaningful only between client and proxy.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
];

/// A parsed absolute-form request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Origin host (no port).
    pub host: String,
    /// Origin port (80 unless the URI carries an explicit non-default port).
    pub port: u16,
    /// The authority as matched against the blocklist (`host` or
    /// `host:port` when a non-default port is present).
    pub authority: String,
    /// Origin-form request target (path plus query).
    pub origin_form: String,
}

impl Target {
    /// Parse an absolute-form `http` target URI.
    ///
    /// Only the `http` scheme is forwarded in the clear; `https` traffic
    /// reaches the proxy as CONNECT and never takes this path.
    pub fn parse(target: &str) -> Result<Self> {
        let parsed = url::Url::parse(target)
            .map_err(|e| ProxyError::HttpParse(format!("invalid request target '{target}': {e}")))?;

        if parsed.scheme() != "http" {
            return Err(ProxyError::HttpParse(format!(
                "unsupported scheme in request target: {target}"
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::HttpParse(format!("missing host in request target: {target}")))?
            .to_string();
        let port = parsed.port().unwrap_or(80);

        let authority = match parsed.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.clone(),
        };

        let path = if parsed.path().is_empty() {
            "/".to_string()
        } else {
            parsed.path().to_string()
        };
        let origin_form = match parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Ok(Self {
            host,
            port,
            authority,
            origin_form,
        })
    }

    /// Value for the rewritten `Host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Forward one plain-HTTP request and relay the origin's response.
///
/// `header_bytes` holds the raw client headers (request line excluded);
/// `buffered_body` holds any bytes the header reader consumed beyond the
/// blank line, which are prepended to the body read from `client`.
pub async fn handle<C>(
    client: &mut C,
    method: &str,
    version: &str,
    target: &Target,
    header_bytes: &[u8],
    buffered_body: &[u8],
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    debug!("forwarding {} {} to {}", method, target.origin_form, target.authority);

    // Header names and values must be UTF-8; a request carrying raw
    // latin-1 bytes is rejected rather than forwarded header-less or
    // with mangled values.
    let Ok(header_str) = std::str::from_utf8(header_bytes) else {
        send_literal(client, BAD_REQUEST_RESPONSE).await?;
        return Err(ProxyError::HttpParse(
            "non-UTF-8 bytes in request headers".to_string(),
        ));
    };

    let headers = strip_proxy_headers(header_str);
    let content_length = extract_content_length(header_str);

    // Read the request body before dialing so a slow client cannot hold an
    // idle upstream connection open.
    let body = match content_length {
        Some(len) if len > MAX_REQUEST_BODY => {
            send_literal(client, b"HTTP/1.0 413 Payload Too Large\r\n\r\n").await?;
            return Err(ProxyError::HttpParse(format!(
                "request body of {len} bytes exceeds limit"
            )));
        }
        Some(len) => {
            let mut body = Vec::with_capacity(len);
            let pre = buffered_body.len().min(len);
            body.extend_from_slice(&buffered_body[..pre]);
            let remaining = len - pre;
            if remaining > 0 {
                let mut rest = vec![0u8; remaining];
                client.read_exact(&mut rest).await?;
                body.extend_from_slice(&rest);
            }
            body
        }
        None => Vec::new(),
    };

    // Dial the origin. Failure here is this request's failure only.
    let mut upstream = match dial_origin(target, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("upstream dial failed for {}: {}", target.authority, e);
            send_literal(client, BAD_GATEWAY_RESPONSE).await?;
            return Err(e);
        }
    };

    let request = build_origin_request(method, version, target, &headers, body.len());
    let exchange = async {
        upstream.write_all(request.as_bytes()).await?;
        if !body.is_empty() {
            upstream.write_all(&body).await?;
        }
        upstream.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    if let Err(e) = exchange.await {
        warn!("upstream write failed for {}: {}", target.authority, e);
        send_literal(client, BAD_GATEWAY_RESPONSE).await?;
        return Err(ProxyError::UpstreamExchange {
            host: target.authority.clone(),
            reason: e.to_string(),
        });
    }

    // Stream the origin's response back unchanged until EOF. The request
    // carries `Connection: close`, but an origin that holds the socket open
    // anyway must not stall the relay, so each read also runs under the
    // idle deadline. Once the first bytes have been relayed the status line
    // is already on the wire, so a later upstream error can only end the
    // response early.
    let mut buf = [0u8; 8192];
    let mut relayed_any = false;
    loop {
        let n = match tokio::time::timeout(idle_timeout, upstream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                if relayed_any {
                    debug!("upstream read ended for {}: {}", target.authority, e);
                    break;
                }
                warn!("upstream read failed for {}: {}", target.authority, e);
                send_literal(client, BAD_GATEWAY_RESPONSE).await?;
                return Err(ProxyError::UpstreamExchange {
                    host: target.authority.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                if relayed_any {
                    debug!("origin idle past timeout for {}, ending relay", target.authority);
                    break;
                }
                warn!("origin response timed out for {}", target.authority);
                send_literal(client, BAD_GATEWAY_RESPONSE).await?;
                return Err(ProxyError::UpstreamExchange {
                    host: target.authority.clone(),
                    reason: "origin response timed out".to_string(),
                });
            }
        };
        client.write_all(&buf[..n]).await?;
        client.flush().await?;
        relayed_any = true;
    }

    if !relayed_any {
        // Origin accepted the connection but sent nothing back.
        send_literal(client, BAD_GATEWAY_RESPONSE).await?;
        return Err(ProxyError::UpstreamExchange {
            host: target.authority.clone(),
            reason: "origin closed without a response".to_string(),
        });
    }

    Ok(())
}

/// Dial the origin with a connect timeout.
async fn dial_origin(target: &Target, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", target.host, target.port);
    match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: target.authority.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: target.authority.clone(),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Collect client headers minus the stripped set, `Host`, and
/// `Content-Length` (both are rewritten, never copied through).
fn strip_proxy_headers(header_str: &str) -> Vec<(String, String)> {
    let mut headers = Vec::new();

    for line in header_str.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let lower = name.to_lowercase();
        if lower == "host" || lower == "content-length" {
            continue;
        }
        if STRIPPED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    headers
}

/// Extract a Content-Length value from raw headers.
fn extract_content_length(header_str: &str) -> Option<usize> {
    for line in header_str.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            let value = line.split_once(':')?.1.trim();
            return value.parse().ok();
        }
    }
    None
}

/// Build the origin-form request: rewritten request line, rewritten `Host`,
/// surviving headers, recomputed `Content-Length`.
///
/// The proxy serves one request per client connection and always closes the
/// origin connection afterwards, so the origin is told `Connection: close`;
/// a keep-alive origin would otherwise hold the relay open after a complete
/// response.
fn build_origin_request(
    method: &str,
    version: &str,
    target: &Target,
    headers: &[(String, String)],
    body_len: usize,
) -> String {
    let mut request = format!(
        "{} {} {}\r\nHost: {}\r\nConnection: close\r\n",
        method,
        target.origin_form,
        version,
        target.host_header()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    if body_len > 0 {
        request.push_str(&format!("Content-Length: {body_len}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Write a literal response to the client.
async fn send_literal<W>(client: &mut W, response: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    client.write_all(response).await?;
    client.flush().await?;
    Ok(())
}
