//! Opening handshake (RFC 6455 Section 4)
//!
//! Validation and key derivation are pure functions in `negotiate`; this
//! module adds the async writers that put the outcome on the raw socket.

mod negotiate;
mod request;

use tokio::io::{AsyncWrite, AsyncWriteExt};

pub use negotiate::{
    accept_response, compute_accept_key, negotiate, reject_response, HandshakeResult, WS_GUID,
    WS_VERSION,
};
pub use request::RequestHead;

/// Write the `101 Switching Protocols` response; the socket stays open.
pub async fn write_accept<S>(stream: &mut S, result: &HandshakeResult) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(accept_response(result).as_bytes()).await?;
    stream.flush().await
}

/// Write an error response and end the socket.
pub async fn write_reject<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    advertise_version: bool,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(reject_response(status, reason, advertise_version).as_bytes())
        .await?;
    stream.flush().await?;
    stream.shutdown().await
}
