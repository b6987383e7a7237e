//! Shared helpers for integration tests: a hub on an ephemeral port and a raw
//! WebSocket client that speaks the client side of the codec.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use socket_hub::types::HandlerResult;
use socket_hub::{Connection, Frame, FrameCodec, Hub, HubConfig, Message, Opcode, ServerHandle};

pub const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
pub const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const WAIT: Duration = Duration::from_secs(5);

/// Config bound to an ephemeral loopback port
pub fn test_config() -> HubConfig {
    HubConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

pub fn echo(conn: &Connection, message: Message) -> HandlerResult {
    conn.send(message)?;
    Ok(())
}

/// Start a hub with `/echo` mounted plus whatever `setup` registers
pub async fn start(config: HubConfig, setup: impl FnOnce(&Hub)) -> (Hub, ServerHandle) {
    let hub = Hub::new(config).unwrap();
    hub.route("/echo", echo);
    setup(&hub);
    let server = hub.start().await.unwrap();
    (hub, server)
}

pub fn upgrade_request(path: &str, extra: &[(&str, &str)]) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    for (name, value) in extra {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Send raw bytes and read the whole response until the server closes
pub async fn http_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Poll until `check` holds or the wait expires
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Wire bytes of `frame` masked with [`MASK`]
pub fn masked(frame: Frame) -> BytesMut {
    let mut out = BytesMut::new();
    FrameCodec::encode_frame(&frame.masked_with(MASK), &mut out);
    out
}

pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
    codec: FrameCodec,
    /// Response head of the upgrade
    pub response: String,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        Self::connect_with(addr, path, &[]).await
    }

    /// Perform the opening handshake; panics unless the server answers 101
    pub async fn connect_with(addr: SocketAddr, path: &str, extra: &[(&str, &str)]) -> Self {
        Self::open(addr, path, extra, &[]).await
    }

    /// Handshake with `early` bytes written in the same packet as the request
    pub async fn connect_early(addr: SocketAddr, path: &str, early: &[u8]) -> Self {
        Self::open(addr, path, &[], early).await
    }

    async fn open(addr: SocketAddr, path: &str, extra: &[(&str, &str)], early: &[u8]) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut request = upgrade_request(path, extra).into_bytes();
        request.extend_from_slice(early);
        stream.write_all(&request).await.unwrap();

        let mut buf = BytesMut::with_capacity(4096);
        let end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = tokio::time::timeout(WAIT, stream.read_buf(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "server closed during handshake");
        };
        let head = buf.split_to(end);
        let response = String::from_utf8(head.to_vec()).unwrap();
        assert!(
            response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
            "unexpected response: {response}"
        );

        Self {
            stream,
            buf,
            codec: FrameCodec::client(16 * 1024 * 1024),
            response,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Send `frame` masked, as a client must
    pub async fn send_frame(&mut self, frame: Frame) {
        self.send_raw(&masked(frame)).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(Frame::new(Opcode::Text, text.to_string())).await;
    }

    /// Next frame, or `None` once the server has closed the socket
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.decode_frame(&mut self.buf).unwrap() {
                return Some(frame);
            }
            let n = tokio::time::timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
        }
    }

    /// Next frame, which must be a text frame
    pub async fn recv_text(&mut self) -> String {
        let frame = self.recv().await.expect("socket closed");
        assert_eq!(frame.opcode, Opcode::Text, "unexpected frame {frame:?}");
        String::from_utf8(frame.payload.to_vec()).unwrap()
    }

    /// Wait for a CLOSE frame and return its status code (`None` if empty)
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            let frame = self.recv().await.expect("socket closed without CLOSE");
            if frame.opcode == Opcode::Close {
                return (frame.payload.len() >= 2)
                    .then(|| u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
            }
        }
    }

    /// True once the server has closed the TCP connection
    pub async fn closed_by_server(&mut self) -> bool {
        loop {
            match self.recv().await {
                None => return true,
                Some(_) => continue,
            }
        }
    }
}
