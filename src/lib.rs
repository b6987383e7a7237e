//! Socket Hub
//!
//! An RFC 6455 WebSocket server subsystem: opening handshake, frame codec,
//! per-connection state machine with heartbeats, named rooms with broadcast,
//! and live statistics.
//!
//! # Features
//!
//! - **Strict codec**: masking, length encodings, fragmentation and control
//!   frame rules enforced; violations close with the right status code
//! - **Per-instance state**: each [`Hub`] owns its registry, rooms and stats
//! - **Heartbeats**: idle connections are pinged, then closed with 1001
//! - **Rooms**: join/leave/broadcast with lazy pruning of dead members
//! - **Admin API**: `/health`, `/stats` and `/rooms` over Axum
//!
//! # Modules
//!
//! - `types`: Ids, messages, close codes and the error taxonomy
//! - `config`: Hub configuration (file + environment)
//! - `protocol`: Frame codec and masking
//! - `handshake`: Upgrade validation and accept-key derivation
//! - `connection`: State machine, driver task, handles and registry
//! - `rooms`: Room membership and broadcast
//! - `stats`: Counters and snapshots
//! - `server`: The `Hub` and its TCP listener
//! - `api`: Admin HTTP router and the demo chat handler
//!
//! # Example
//!
//! ```no_run
//! use socket_hub::{Connection, Hub, HubConfig, Message};
//! use socket_hub::types::HandlerResult;
//!
//! fn echo(conn: &Connection, message: Message) -> HandlerResult {
//!     conn.send(message)?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::new(HubConfig::default())?;
//!     hub.route("/echo", echo);
//!     let server = hub.start().await?;
//!     println!("listening on {}", server.local_addr);
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod protocol;
pub mod rooms;
pub mod server;
pub mod stats;
pub mod types;

// Re-export commonly used items at crate root
pub use config::HubConfig;
pub use connection::{Connection, MessageHandler};
pub use protocol::{Frame, FrameCodec, Opcode, Role};
pub use rooms::RoomManager;
pub use server::{Hub, ServerHandle};
pub use stats::{StatsSnapshot, StatsTracker};
pub use types::{
    CloseCode, CloseFrame, ConnectionId, HubError, HubResult, Message, ReadyState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
