//! Upgrade validation and accept-key derivation (RFC 6455 Section 4.2)
//!
//! Everything here is a pure function of the request head and the server's
//! settings; writing the response is left to the caller.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use super::request::RequestHead;

/// Fixed GUID appended to the client key before hashing
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken
pub const WS_VERSION: &str = "13";

/// Outcome of validating an upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeResult {
    pub accepted: bool,
    /// `Sec-WebSocket-Accept` value (empty when rejected)
    pub accept_key: String,
    /// First client-offered sub-protocol the server supports
    pub selected_protocol: Option<String>,
    pub reject_reason: Option<String>,
    /// Rejected because of the version header; the response advertises 13
    pub version_mismatch: bool,
}

impl HandshakeResult {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            reject_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// base64(SHA-1(client key + GUID))
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Validate an upgrade request and pick a sub-protocol.
///
/// Header names and the `Upgrade`/`Connection` tokens compare
/// case-insensitively. When `allowed_origins` is set, a missing or unlisted
/// `Origin` rejects the request like any other bad header.
pub fn negotiate(
    head: &RequestHead,
    supported_protocols: &[String],
    allowed_origins: Option<&[String]>,
) -> HandshakeResult {
    if !head.method.eq_ignore_ascii_case("GET") {
        return HandshakeResult::rejected(format!("method {} not allowed", head.method));
    }

    match head.header("Upgrade") {
        Some(value) if value.trim().eq_ignore_ascii_case("websocket") => {}
        _ => return HandshakeResult::rejected("missing or invalid Upgrade header"),
    }

    let has_upgrade_token = head
        .header_values("Connection")
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !has_upgrade_token {
        return HandshakeResult::rejected("Connection header lacks upgrade token");
    }

    if head.header("Sec-WebSocket-Version").map(str::trim) != Some(WS_VERSION) {
        return HandshakeResult {
            version_mismatch: true,
            ..HandshakeResult::rejected("unsupported Sec-WebSocket-Version")
        };
    }

    let key = match head.header("Sec-WebSocket-Key").map(str::trim) {
        Some(key) if !key.is_empty() => key,
        _ => return HandshakeResult::rejected("missing Sec-WebSocket-Key"),
    };

    if let Some(allowed) = allowed_origins {
        let origin_ok = head
            .header("Origin")
            .map(|origin| allowed.iter().any(|a| a.eq_ignore_ascii_case(origin.trim())))
            .unwrap_or(false);
        if !origin_ok {
            return HandshakeResult::rejected("origin not allowed");
        }
    }

    let selected_protocol = head
        .header_values("Sec-WebSocket-Protocol")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|offered| supported_protocols.iter().any(|s| s == offered))
        .map(String::from);

    HandshakeResult {
        accepted: true,
        accept_key: compute_accept_key(key),
        selected_protocol,
        reject_reason: None,
        version_mismatch: false,
    }
}

/// `101 Switching Protocols` response for an accepted handshake
pub fn accept_response(result: &HandshakeResult) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        result.accept_key
    );
    if let Some(protocol) = &result.selected_protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str("\r\n");
    response
}

/// Minimal error response that closes the connection
pub fn reject_response(status: u16, reason: &str, advertise_version: bool) -> String {
    let status_text = match status {
        400 => "Bad Request",
        404 => "Not Found",
        431 => "Request Header Fields Too Large",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let version = if advertise_version {
        format!("Sec-WebSocket-Version: {WS_VERSION}\r\n")
    } else {
        String::new()
    };
    format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Connection: close\r\n\
         {version}\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\r\n{reason}",
        reason.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RequestHead {
        RequestHead::new("GET", "/ws")
            .with_header("Host", "server.example.com")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("Sec-WebSocket-Version", "13")
    }

    #[test]
    fn test_rfc_accept_key() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accepts_valid_request() {
        let result = negotiate(&valid_request(), &[], None);
        assert!(result.accepted);
        assert_eq!(result.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(result.selected_protocol, None);
    }

    #[test]
    fn test_header_checks_are_case_insensitive() {
        let head = RequestHead::new("GET", "/ws")
            .with_header("upgrade", "WebSocket")
            .with_header("connection", "keep-alive, UPGRADE")
            .with_header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("SEC-WEBSOCKET-VERSION", "13");
        assert!(negotiate(&head, &[], None).accepted);
    }

    #[test]
    fn test_rejections() {
        let cases = [
            RequestHead::new("POST", "/ws"),
            RequestHead::new("GET", "/ws").with_header("Upgrade", "h2c"),
            RequestHead::new("GET", "/ws")
                .with_header("Upgrade", "websocket")
                .with_header("Connection", "keep-alive"),
            RequestHead::new("GET", "/ws")
                .with_header("Upgrade", "websocket")
                .with_header("Connection", "Upgrade")
                .with_header("Sec-WebSocket-Version", "13"),
        ];
        for head in cases {
            let result = negotiate(&head, &[], None);
            assert!(!result.accepted);
            assert!(result.reject_reason.is_some());
            assert!(result.accept_key.is_empty());
        }
    }

    #[test]
    fn test_version_mismatch_is_flagged() {
        let head = RequestHead::new("GET", "/ws")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Key", "abc")
            .with_header("Sec-WebSocket-Version", "8");
        let result = negotiate(&head, &[], None);
        assert!(!result.accepted);
        assert!(result.version_mismatch);
        assert!(reject_response(400, "bad version", true).contains("Sec-WebSocket-Version: 13"));
    }

    #[test]
    fn test_first_mutual_protocol_in_client_order() {
        let head = valid_request().with_header("Sec-WebSocket-Protocol", "v3, v2, v1");
        let supported = vec!["v1".to_string(), "v2".to_string()];
        let result = negotiate(&head, &supported, None);
        assert_eq!(result.selected_protocol.as_deref(), Some("v2"));
        assert!(accept_response(&result).contains("Sec-WebSocket-Protocol: v2\r\n"));

        let none = negotiate(&head, &["v9".to_string()], None);
        assert!(none.accepted);
        assert!(!accept_response(&none).contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_origin_allow_list() {
        let allowed = vec!["https://app.example".to_string()];
        assert!(!negotiate(&valid_request(), &[], Some(allowed.as_slice())).accepted);

        let ok = valid_request().with_header("Origin", "https://app.example");
        assert!(negotiate(&ok, &[], Some(allowed.as_slice())).accepted);

        let bad = valid_request().with_header("Origin", "https://evil.example");
        let result = negotiate(&bad, &[], Some(allowed.as_slice()));
        assert_eq!(result.reject_reason.as_deref(), Some("origin not allowed"));
    }

    #[test]
    fn test_accept_response_layout() {
        let result = negotiate(&valid_request(), &[], None);
        assert_eq!(
            accept_response(&result),
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn test_reject_response_layout() {
        let response = reject_response(400, "nope", false);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("Content-Length: 4\r\n\r\nnope"));
    }
}
