//! Error taxonomy for the hub

use super::{CloseCode, ConnectionId};

/// Errors that can occur anywhere in the hub.
///
/// Codec and state-machine failures are resolved inside the hub (a CLOSE frame
/// with [`HubError::close_code`] is sent and the socket released); they are
/// only surfaced outward through handler notifications and stats.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Bad upgrade request; no connection is ever created
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Declared frame length or accumulated fragmented size over the limit
    #[error("message too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A handler returned an error or panicked
    #[error("application error: {0}")]
    Application(String),

    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),

    #[error("send queue full for connection {0}")]
    QueueFull(ConnectionId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("invalid room name: {0:?}")]
    InvalidRoom(String),

    #[error("close code {0} may not be sent")]
    InvalidCloseCode(u16),

    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlPayloadTooLarge(usize),

    #[error("connection limit reached ({0})")]
    CapacityExceeded(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Close status sent to the peer when this error terminates a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            HubError::ProtocolViolation(_) | HubError::ControlPayloadTooLarge(_) => {
                CloseCode::ProtocolError
            }
            HubError::PayloadTooLarge { .. } => CloseCode::TooLarge,
            HubError::InvalidUtf8 => CloseCode::InvalidPayload,
            HubError::Transport(_) => CloseCode::Abnormal,
            HubError::CapacityExceeded(_) => CloseCode::GoingAway,
            _ => CloseCode::Internal,
        }
    }

    /// Shorthand for protocol violations
    pub fn protocol(msg: impl Into<String>) -> Self {
        HubError::ProtocolViolation(msg.into())
    }
}
