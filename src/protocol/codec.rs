//! Resumable frame decoder and encoder
//!
//! The decoder is stateless between calls: it only consumes bytes from the
//! front of the buffer once a whole frame is present, so a partial frame
//! simply stays in the buffer until the next read appends the rest.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::frame::{Frame, Opcode, MAX_CONTROL_PAYLOAD};
use super::mask::apply_mask;
use crate::types::{HubError, HubResult};

/// Which side of the connection the codec decodes for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Decodes client frames, which must be masked
    Server,
    /// Decodes server frames, which must not be masked
    Client,
}

/// WebSocket frame codec
#[derive(Clone, Debug)]
pub struct FrameCodec {
    role: Role,
    max_message_size: usize,
}

impl FrameCodec {
    /// Default payload limit (1 MiB)
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    pub fn new(role: Role, max_message_size: usize) -> Self {
        Self {
            role,
            max_message_size,
        }
    }

    /// Codec for frames arriving from clients
    pub fn server(max_message_size: usize) -> Self {
        Self::new(Role::Server, max_message_size)
    }

    /// Codec for frames arriving from a server
    pub fn client(max_message_size: usize) -> Self {
        Self::new(Role::Client, max_message_size)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decode every complete frame at the front of `buf`.
    ///
    /// Whatever is left in `buf` afterwards is the undecoded remainder.
    pub fn decode(&self, buf: &mut BytesMut) -> HubResult<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_frame(buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Decode a single frame, or return `None` if more bytes are needed.
    ///
    /// An oversized declared length fails as soon as the length field is
    /// readable, before any payload is buffered.
    pub fn decode_frame(&self, buf: &mut BytesMut) -> HubResult<Option<Frame>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let first = buf[0];
        let second = buf[1];

        let fin = first & 0x80 != 0;
        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;
        if rsv1 || rsv2 || rsv3 {
            return Err(HubError::protocol("reserved bits set without extension"));
        }
        let opcode = Opcode::from_u8(first & 0x0F)?;
        let masked = second & 0x80 != 0;
        match self.role {
            Role::Server if !masked => return Err(HubError::protocol("client frame is not masked")),
            Role::Client if masked => return Err(HubError::protocol("server frame is masked")),
            _ => {}
        }

        let len7 = second & 0x7F;
        if opcode.is_control() {
            if !fin {
                return Err(HubError::protocol("fragmented control frame"));
            }
            if usize::from(len7) > MAX_CONTROL_PAYLOAD {
                return Err(HubError::ControlPayloadTooLarge(usize::from(len7)));
            }
        }

        let (payload_length, mut header_len) = match len7 {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(HubError::protocol("64-bit length with high bit set"));
                }
                (len, 10)
            }
            n => (u64::from(n), 2),
        };

        if payload_length > self.max_message_size as u64 {
            return Err(HubError::PayloadTooLarge {
                size: payload_length,
                max: self.max_message_size,
            });
        }
        // Bounded by max_message_size above
        let payload_len = payload_length as usize;

        let masking_key = if masked {
            if buf.len() < header_len + 4 {
                return Ok(None);
            }
            let key = [
                buf[header_len],
                buf[header_len + 1],
                buf[header_len + 2],
                buf[header_len + 3],
            ];
            header_len += 4;
            Some(key)
        } else {
            None
        };

        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        buf.advance(header_len);
        let mut payload = buf.split_to(payload_len);
        if let Some(key) = masking_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masked,
            payload_length,
            masking_key,
            payload: payload.freeze(),
        }))
    }

    /// Encode a single final, unmasked frame as the server sends it.
    pub fn encode(opcode: Opcode, payload: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(header_size(payload.len(), false) + payload.len());
        write_header(&mut out, true, opcode, payload.len(), None);
        out.put_slice(payload);
        out.freeze()
    }

    /// Encode `frame` as-is into `out`, honouring its FIN bit and masking key.
    pub fn encode_frame(frame: &Frame, out: &mut BytesMut) {
        let key = if frame.masked { frame.masking_key } else { None };
        let len = frame.payload.len();
        out.reserve(header_size(len, key.is_some()) + len);
        write_header(out, frame.fin, frame.opcode, len, key);
        let start = out.len();
        out.put_slice(&frame.payload);
        if let Some(key) = key {
            apply_mask(&mut out[start..], key);
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::server(Self::DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn header_size(len: usize, masked: bool) -> usize {
    let base = match len {
        0..=125 => 2,
        126..=0xFFFF => 4,
        _ => 10,
    };
    if masked {
        base + 4
    } else {
        base
    }
}

fn write_header(out: &mut BytesMut, fin: bool, opcode: Opcode, len: usize, key: Option<[u8; 4]>) {
    let fin_bit = if fin { 0x80 } else { 0x00 };
    out.put_u8(fin_bit | opcode as u8);
    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    match len {
        0..=125 => out.put_u8(mask_bit | len as u8),
        126..=0xFFFF => {
            out.put_u8(mask_bit | 126);
            out.put_u16(len as u16);
        }
        _ => {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }
    }
    if let Some(key) = key {
        out.put_slice(&key);
    }
}
