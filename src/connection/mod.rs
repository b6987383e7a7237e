//! Connection lifecycle
//!
//! - `state`: the pure CONNECTING/OPEN/CLOSING/CLOSED state machine
//! - `driver`: the per-connection task that owns the socket
//! - `handle`: the cloneable [`Connection`] handed to application code
//! - `registry`: the table of live connections
//! - `handler`: the [`MessageHandler`] callback trait

mod driver;
mod handle;
mod handler;
mod registry;
mod state;

pub(crate) use driver::{Driver, DriverContext};
pub(crate) use handle::Command;
pub use handle::{Connection, ConnectionInfo};
pub use handler::MessageHandler;
pub use registry::ConnectionRegistry;
pub use state::{Action, ConnectionState, Timeouts};
