//! Plain TCP front end
//!
//! Reads the HTTP request head off each accepted socket and hands it to
//! [`Hub::upgrade_until`]. The whole exchange, from accept to the 101
//! response, must finish within `handshake_timeout`; a socket that misses the
//! deadline is dropped without a response.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout_at, Instant};

use super::Hub;
use crate::handshake::{write_reject, RequestHead};
use crate::types::{HubError, HubResult};

pub(super) async fn accept_loop(hub: Hub, listener: TcpListener) -> HubResult<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Back off on fd exhaustion
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
        }
        let hub = hub.clone();
        tokio::spawn(async move { handle_socket(hub, stream, peer).await });
    }
}

async fn handle_socket(hub: Hub, mut stream: TcpStream, peer: SocketAddr) {
    let deadline = Instant::now() + hub.config().handshake_timeout();
    let max_header_size = hub.config().max_header_size;

    let (head, leftover) = match timeout_at(deadline, read_head(&mut stream, max_header_size)).await
    {
        Ok(Ok(read)) => read,
        Ok(Err(HeadError::Invalid(status, reason))) => {
            hub.stats().handshake_rejected();
            tracing::warn!(peer = %peer, status, reason = %reason, "upgrade rejected");
            let _ = timeout_at(deadline, write_reject(&mut stream, status, &reason, false)).await;
            return;
        }
        Ok(Err(HeadError::Io(e))) => {
            tracing::debug!(peer = %peer, error = %e, "socket closed before request head");
            return;
        }
        Err(_) => {
            hub.stats().handshake_timed_out();
            tracing::warn!(peer = %peer, "handshake timed out");
            return;
        }
    };

    tracing::debug!(peer = %peer, method = %head.method, path = %head.path, "upgrade request");
    if let Err(e) = hub
        .upgrade_until(stream, head, leftover, Some(peer), deadline)
        .await
    {
        tracing::debug!(peer = %peer, error = %e, "upgrade failed");
    }
}

#[derive(Debug)]
enum HeadError {
    /// Answer with this status and reason
    Invalid(u16, String),
    Io(std::io::Error),
}

/// Read until the blank line ending the request head.
///
/// Returns the head and whatever bytes followed it.
async fn read_head<S>(
    stream: &mut S,
    max_header_size: usize,
) -> Result<(RequestHead, BytesMut), HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(parsed) = RequestHead::parse(&buf) {
            return match parsed {
                Ok((head, offset)) => {
                    let leftover = buf.split_off(offset);
                    Ok((head, leftover))
                }
                Err(HubError::HandshakeRejected(reason)) => Err(HeadError::Invalid(400, reason)),
                Err(e) => Err(HeadError::Invalid(400, e.to_string())),
            };
        }
        if buf.len() >= max_header_size {
            return Err(HeadError::Invalid(
                431,
                format!("request head exceeds {max_header_size} bytes"),
            ));
        }
        let n = stream.read_buf(&mut buf).await.map_err(HeadError::Io)?;
        if n == 0 {
            return Err(HeadError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
    }
}
