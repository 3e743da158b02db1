//! HTTP CONNECT tunnel establishment and byte splicing.
//!
//! On an admitted CONNECT the proxy takes exclusive ownership of the client
//! byte stream (no request/response framing applies afterwards), dials the
//! target, acknowledges the tunnel, and relays bytes in both directions until
//! close. The tunnel is opaque: TLS passes through undecrypted.
//!
//! Each direction runs as its own task. A direction that reaches end of
//! stream (or errors, or sits idle past the timeout) half-closes the write
//! side of its destination and releases the read side of its source, so the
//! peer observes an orderly shutdown. The target-to-client direction alone
//! logs the tunnel's closure, keeping one log line per tunnel.

use crate::audit;
use crate::error::{ProxyError, Result};
use crate::forward::BAD_GATEWAY_RESPONSE;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Literal acknowledgment written to the client once the target is dialed.
pub const ESTABLISHED_RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";

/// Default port appended to an un-ported CONNECT target.
///
/// Historically 80, although CONNECT tunnels normally carry TLS on 443.
/// Preserved as documented behavior; not a guess to be "fixed" silently.
pub const DEFAULT_CONNECT_PORT: u16 = 80;

/// Establish a CONNECT tunnel to `authority` and splice until both
/// directions close.
///
/// `preamble` carries client bytes the request-head reader consumed past the
/// header terminator — a pipelining client may send its first tunnel bytes
/// (typically a TLS ClientHello) in the same segment as the CONNECT head.
/// They are delivered to the target ahead of the splice so nothing is lost.
///
/// If the dial fails the client receives a literal 502 and no splice task is
/// spawned. On success the function returns only after both directions have
/// finished, so a draining server can wait out in-flight tunnels.
pub async fn handle<C>(
    mut client: C,
    authority: &str,
    preamble: &[u8],
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let target_addr = normalize_authority(authority);
    debug!("CONNECT to {}", target_addr);

    let mut target = match dial_target(&target_addr, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("tunnel dial failed for {}: {}", target_addr, e);
            client.write_all(BAD_GATEWAY_RESPONSE).await?;
            client.flush().await?;
            return Err(e);
        }
    };

    client.write_all(ESTABLISHED_RESPONSE).await?;
    client.flush().await?;

    if !preamble.is_empty() {
        target.write_all(preamble).await?;
        target.flush().await?;
    }

    let (client_read, client_write) = tokio::io::split(client);
    let (target_read, target_write) = tokio::io::split(target);

    // Client-to-target never logs closure; target-to-client owns the single
    // per-tunnel close line.
    let uplink = tokio::spawn(splice(client_read, target_write, idle_timeout, None));
    let downlink = tokio::spawn(splice(
        target_read,
        client_write,
        idle_timeout,
        Some(target_addr),
    ));

    let _ = uplink.await;
    let _ = downlink.await;
    Ok(())
}

/// Copy bytes from `src` to `dst` until end of stream, error, or idle
/// timeout, then half-close `dst` and release `src`.
async fn splice<R, W>(mut src: R, mut dst: W, idle_timeout: Duration, close_log: Option<String>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = match tokio::time::timeout(idle_timeout, src.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("tunnel read ended: {}", e);
                break;
            }
            Err(_) => {
                debug!("tunnel direction idle past timeout, closing");
                break;
            }
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            debug!("tunnel write ended: {}", e);
            break;
        }
        if let Err(e) = dst.flush().await {
            debug!("tunnel flush ended: {}", e);
            break;
        }
    }

    // Half-close: no more bytes will flow this direction; the opposite
    // direction keeps running until its own end of stream.
    let _ = dst.shutdown().await;
    drop(src);

    if let Some(authority) = close_log {
        audit::log_tunnel_closed(&authority);
    }
}

/// Dial the tunnel target with a connect timeout.
async fn dial_target(target_addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(target_addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: target_addr.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: target_addr.to_string(),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Append the default port to an authority that carries none.
#[must_use]
pub fn normalize_authority(authority: &str) -> String {
    if has_port(authority) {
        authority.to_string()
    } else {
        format!("{authority}:{DEFAULT_CONNECT_PORT}")
    }
}

/// Whether the authority ends in an explicit `:<digits>` port.
fn has_port(authority: &str) -> bool {
    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
