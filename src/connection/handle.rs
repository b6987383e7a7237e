//! Application-facing connection handle

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::rooms::RoomManager;
use crate::types::{CloseCode, ConnectionId, HubError, HubResult, Message, ReadyState};

/// Requests from handles to the connection's driver task
#[derive(Debug)]
pub(crate) enum Command {
    Send(Message),
    Close { code: CloseCode, reason: String },
}

/// Facts fixed at upgrade time
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub peer_addr: Option<SocketAddr>,
    /// Path the upgrade request targeted
    pub path: String,
    /// Negotiated sub-protocol
    pub protocol: Option<String>,
}

/// Cheap, cloneable handle to one live connection.
///
/// Sends are queued to the connection's driver task and never block; the
/// queue is bounded by `max_send_queue`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    info: ConnectionInfo,
    connected_at: DateTime<Utc>,
    ready_state: AtomicU8,
    commands: mpsc::Sender<Command>,
    rooms: Arc<RoomManager>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        info: ConnectionInfo,
        commands: mpsc::Sender<Command>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                info,
                connected_at: Utc::now(),
                ready_state: AtomicU8::new(ReadyState::Connecting as u8),
                commands,
                rooms,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.info.peer_addr
    }

    pub fn path(&self) -> &str {
        &self.inner.info.path
    }

    pub fn protocol(&self) -> Option<&str> {
        self.inner.info.protocol.as_deref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.ready_state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Published by the driver after every transition
    pub(crate) fn set_ready_state(&self, state: ReadyState) {
        self.inner.ready_state.store(state as u8, Ordering::Release);
    }

    /// Queue a message; it goes out as a single unmasked frame.
    pub fn send(&self, message: impl Into<Message>) -> HubResult<()> {
        if !self.is_open() {
            return Err(HubError::NotOpen(self.id()));
        }
        self.enqueue(Command::Send(message.into()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> HubResult<()> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<bytes::Bytes>) -> HubResult<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Start the closing handshake. `None` sends 1000.
    ///
    /// Codes reserved for the protocol itself (1005, 1006, 1015 and the
    /// unassigned ranges) are refused.
    pub fn close(&self, code: Option<u16>, reason: &str) -> HubResult<()> {
        let code = code.map(CloseCode::from).unwrap_or(CloseCode::Normal);
        if !code.is_valid_on_wire() {
            return Err(HubError::InvalidCloseCode(code.into()));
        }
        match self.ready_state() {
            ReadyState::Closing | ReadyState::Closed => Ok(()),
            _ => self.enqueue(Command::Close {
                code,
                reason: reason.to_string(),
            }),
        }
    }

    /// Join `room`; `Ok(false)` if already a member.
    pub fn join(&self, room: &str) -> HubResult<bool> {
        self.inner.rooms.join(self.id(), room)
    }

    /// Leave `room`; `false` if not a member.
    pub fn leave(&self, room: &str) -> bool {
        self.inner.rooms.leave(self.id(), room)
    }

    /// Rooms this connection belongs to, sorted
    pub fn rooms(&self) -> Vec<String> {
        self.inner.rooms.rooms_of(self.id())
    }

    /// Send to every other open member of `room`.
    pub fn broadcast(&self, room: &str, message: impl Into<Message>) -> usize {
        self.inner
            .rooms
            .broadcast(room, &message.into(), Some(self.id()))
    }

    fn enqueue(&self, command: Command) -> HubResult<()> {
        self.inner.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(connection_id = %self.id(), "send queue full");
                HubError::QueueFull(self.id())
            }
            mpsc::error::TrySendError::Closed(_) => HubError::NotOpen(self.id()),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("path", &self.inner.info.path)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
