//! Minimal HTTP/1.1 request-head parsing for upgrade requests

use crate::types::{HubError, HubResult};

/// Method, target and headers of an HTTP request, without the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Percent-decoded path, query string removed
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            headers: Vec::new(),
        }
    }

    /// Builder-style header insertion (repeated names are kept)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in request order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Parse a request head from the front of `buf`.
    ///
    /// Returns `None` while the terminating blank line has not arrived yet,
    /// otherwise the head and the offset of the first byte after it.
    pub fn parse(buf: &[u8]) -> Option<HubResult<(RequestHead, usize)>> {
        let end = find_header_end(buf)?;
        Some(parse_head(&buf[..end]).map(|head| (head, end + 4)))
    }
}

fn parse_head(bytes: &[u8]) -> HubResult<RequestHead> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| HubError::HandshakeRejected("request head is not UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if !m.is_empty() && t.starts_with('/') => (m, t, v),
        _ => {
            return Err(HubError::HandshakeRejected(format!(
                "malformed request line: {request_line:?}"
            )))
        }
    };
    if version != "HTTP/1.1" {
        return Err(HubError::HandshakeRejected(format!(
            "unsupported HTTP version {version}"
        )));
    }

    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    let path = urlencoding::decode(raw_path)
        .map_err(|_| HubError::HandshakeRejected("path is not valid UTF-8".into()))?
        .into_owned();

    let mut head = RequestHead {
        method: method.to_string(),
        path,
        query,
        headers: Vec::new(),
    };
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            HubError::HandshakeRejected(format!("malformed header line: {line:?}"))
        })?;
        head.headers
            .push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(head)
}

/// Offset of the `\r\n\r\n` that ends the head
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
