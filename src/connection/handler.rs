//! Application callbacks

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::Connection;
use crate::types::{CloseFrame, HandlerResult, HubError, Message};

/// Callbacks invoked by a connection's driver task.
///
/// Calls for one connection are sequential and never overlap. A returned
/// error or a panic is treated as an application error: it is logged, counted
/// and, unless disabled in the config, closes the connection with 1011.
pub trait MessageHandler: Send + Sync + 'static {
    /// Connection reached OPEN
    fn on_open(&self, _conn: &Connection) -> HandlerResult {
        Ok(())
    }

    /// A complete text or binary message arrived
    fn on_message(&self, conn: &Connection, message: Message) -> HandlerResult;

    /// Connection reached CLOSED; called exactly once
    fn on_close(&self, _conn: &Connection, _close: &CloseFrame) {}

    /// Protocol, transport or application failure on this connection
    fn on_error(&self, _conn: &Connection, _error: &HubError) {}
}

impl<F> MessageHandler for F
where
    F: Fn(&Connection, Message) -> HandlerResult + Send + Sync + 'static,
{
    fn on_message(&self, conn: &Connection, message: Message) -> HandlerResult {
        self(conn, message)
    }
}

/// Run a handler callback, turning errors and panics into `HubError`.
pub(crate) fn guarded<F>(call: F) -> Result<(), HubError>
where
    F: FnOnce() -> HandlerResult,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HubError::Application(e.to_string())),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HubError::Application(format!("handler panicked: {detail}")))
        }
    }
}
