//! Close status codes (RFC 6455 Section 7.4)

use serde::{Deserialize, Serialize};

/// Close status code carried in a CLOSE frame or reported to handlers.
///
/// Codes without a named variant (application codes 3000-4999 and codes this
/// crate does not interpret) pass through as `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001: endpoint going away or idle timeout
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    Unsupported,
    /// 1005: no status present; never sent on the wire
    NoStatus,
    /// 1006: abrupt close; never sent on the wire
    Abnormal,
    /// 1007: payload inconsistent with the message type (bad UTF-8)
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    TooLarge,
    /// 1011
    Internal,
    Other(u16),
}

impl CloseCode {
    /// Whether a peer may legitimately put this code in a CLOSE frame.
    pub fn is_valid_on_wire(self) -> bool {
        let code = u16::from(self);
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }

    /// Whether this code carries the meaning of a clean, expected shutdown.
    pub fn is_normal(self) -> bool {
        matches!(self, CloseCode::Normal | CloseCode::GoingAway)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooLarge,
            1011 => CloseCode::Internal,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooLarge => 1009,
            CloseCode::Internal => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Status code and reason of a finished (or finishing) close handshake
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: impl Into<CloseCode>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Reported when the transport vanished without a CLOSE frame
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Abnormal, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes_map_both_ways() {
        for raw in [1000u16, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1011] {
            let code = CloseCode::from(raw);
            assert!(!matches!(code, CloseCode::Other(_)), "{raw} should be named");
            assert_eq!(u16::from(code), raw);
        }
    }

    #[test]
    fn test_application_codes_pass_through() {
        let code = CloseCode::from(4321);
        assert_eq!(code, CloseCode::Other(4321));
        assert_eq!(u16::from(code), 4321);
        assert!(code.is_valid_on_wire());
    }

    #[test]
    fn test_reserved_codes_are_invalid_on_wire() {
        for raw in [0u16, 999, 1004, 1005, 1006, 1015, 1016, 2999, 5000] {
            assert!(!CloseCode::from(raw).is_valid_on_wire(), "{raw}");
        }
    }

    #[test]
    fn test_close_code_serializes_as_number() {
        let json = serde_json::to_string(&CloseFrame::new(1009u16, "too big")).unwrap();
        assert_eq!(json, r#"{"code":1009,"reason":"too big"}"#);
    }
}
