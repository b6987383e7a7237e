//! Frame and opcode types (RFC 6455 Section 5.2)

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{CloseCode, CloseFrame, HubError, HubResult};

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// 4-bit frame opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    ///
    /// Reserved opcodes (0x3-0x7, 0xB-0xF) are protocol violations since no
    /// extension is ever negotiated.
    pub fn from_u8(value: u8) -> HubResult<Self> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(HubError::protocol(format!("reserved opcode 0x{other:X}"))),
        }
    }

    /// CLOSE, PING and PONG
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One decoded or to-be-encoded frame.
///
/// `payload` is always stored unmasked; `masking_key` records the key the
/// frame carried (or will carry) on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_length: u64,
    pub masking_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Final, unmasked frame
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload_length: payload.len() as u64,
            masking_key: None,
            payload,
        }
    }

    /// PING with an optional payload of at most 125 bytes
    pub fn ping(payload: impl Into<Bytes>) -> HubResult<Self> {
        Self::control(Opcode::Ping, payload.into())
    }

    /// PONG with an optional payload of at most 125 bytes
    pub fn pong(payload: impl Into<Bytes>) -> HubResult<Self> {
        Self::control(Opcode::Pong, payload.into())
    }

    /// CLOSE carrying a big-endian status code and a UTF-8 reason.
    ///
    /// The reason is cut at a character boundary so the payload never exceeds
    /// the control-frame limit.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = BytesMut::with_capacity(2 + end);
        buf.put_u16(u16::from(code));
        buf.put_slice(&reason.as_bytes()[..end]);
        Self::new(Opcode::Close, buf.freeze())
    }

    /// CLOSE with no body, used to echo a peer CLOSE that carried no status
    pub fn close_empty() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Same frame with the FIN bit cleared
    pub fn non_final(mut self) -> Self {
        self.fin = false;
        self
    }

    /// Same frame, masked with `key` when encoded
    pub fn masked_with(mut self, key: [u8; 4]) -> Self {
        self.masked = true;
        self.masking_key = Some(key);
        self
    }

    fn control(opcode: Opcode, payload: Bytes) -> HubResult<Self> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(HubError::ControlPayloadTooLarge(payload.len()));
        }
        Ok(Self::new(opcode, payload))
    }
}

/// Parse the body of a CLOSE frame.
///
/// Returns `None` for an empty body (no status), otherwise the status code and
/// reason. A one-byte body, a status code that may not appear on the wire, or
/// a reason that is not UTF-8 are protocol violations.
pub fn parse_close_payload(payload: &[u8]) -> HubResult<Option<CloseFrame>> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(HubError::protocol("close payload of one byte")),
        _ => {
            let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_valid_on_wire() {
                return Err(HubError::protocol(format!("invalid close code {code}")));
            }
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| HubError::protocol("close reason is not UTF-8"))?;
            Ok(Some(CloseFrame::new(code, reason)))
        }
    }
}
