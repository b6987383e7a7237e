//! Outer surfaces of the hub
//!
//! `http` serves the read-only admin endpoints; `chat` is the demo message
//! handler mounted by the binary.

pub mod chat;
pub mod http;
