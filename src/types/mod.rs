//! Shared types for the socket hub
//!
//! This module contains the identifiers, message and close-code types used
//! across the codec, the connection state machine and the room manager.

mod close;
mod error;
mod message;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use close::{CloseCode, CloseFrame};
pub use error::HubError;
pub use message::Message;

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Result type returned by application handlers
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Identifier of a live (or recently closed) connection.
///
/// Ids are allocated from a per-hub counter and never reused within a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    /// Decode a state previously stored with `as u8`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}
