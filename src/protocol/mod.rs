//! RFC 6455 frame codec
//!
//! Decodes the binary frame format from a connection's read buffer and
//! encodes outbound frames. Masking is one-directional: frames from clients
//! are masked, frames written by the server never are.

mod codec;
mod frame;
mod mask;

pub use codec::{FrameCodec, Role};
pub use frame::{parse_close_payload, Frame, Opcode, MAX_CONTROL_PAYLOAD};
pub use mask::apply_mask;
