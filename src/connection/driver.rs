//! Per-connection I/O task
//!
//! One task owns the socket of one connection. It reads and decodes frames,
//! feeds them to the [`ConnectionState`], writes whatever the state machine
//! asks for, and drains the handle's command queue. Handler callbacks run
//! inline on this task, so a connection's messages are delivered in order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::handle::Command;
use super::handler::{guarded, MessageHandler};
use super::state::{Action, ConnectionState, Timeouts};
use super::{Connection, ConnectionRegistry};
use crate::config::HubConfig;
use crate::protocol::{Frame, FrameCodec};
use crate::rooms::RoomManager;
use crate::stats::StatsTracker;
use crate::types::{CloseCode, CloseFrame, HubError, Message, ReadyState};

const READ_CHUNK: usize = 8 * 1024;

/// Shared services a driver reports to
#[derive(Clone)]
pub(crate) struct DriverContext {
    pub config: Arc<HubConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub stats: Arc<StatsTracker>,
    pub handler: Arc<dyn MessageHandler>,
}

pub(crate) struct Driver<S> {
    stream: S,
    read_buf: BytesMut,
    codec: FrameCodec,
    state: ConnectionState,
    conn: Connection,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    /// Cleared after a codec error; later input is discarded
    decoding: bool,
    ctx: DriverContext,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `leftover` holds bytes that arrived right behind the upgrade request.
    pub(crate) fn new(
        stream: S,
        leftover: BytesMut,
        conn: Connection,
        commands: mpsc::Receiver<Command>,
        ctx: DriverContext,
    ) -> Self {
        let max_message_size = ctx.config.max_message_size;
        let timeouts = Timeouts::from(&*ctx.config);
        Self {
            stream,
            read_buf: leftover,
            codec: FrameCodec::server(max_message_size),
            state: ConnectionState::new(max_message_size, timeouts, Instant::now()),
            conn,
            commands,
            commands_open: true,
            decoding: true,
            ctx,
        }
    }

    pub(crate) async fn run(mut self) {
        self.state.open(Instant::now());
        self.publish();

        let mut closed = None;
        if let Err(error) = guarded(|| self.ctx.handler.on_open(&self.conn)) {
            let actions = self.application_error(error);
            closed = self.apply(actions).await;
        }
        if closed.is_none() {
            closed = self.process_input().await;
        }
        let closed = match closed {
            Some(close) => close,
            None => self.event_loop().await,
        };
        self.finish(closed).await;
    }

    async fn event_loop(&mut self) -> CloseFrame {
        loop {
            let deadline = self.state.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };
            self.read_buf.reserve(READ_CHUNK);

            let actions = tokio::select! {
                read = self.stream.read_buf(&mut self.read_buf) => match read {
                    Ok(0) => {
                        debug!(connection_id = %self.conn.id(), "peer closed the socket");
                        self.state.on_transport_closed("connection reset by peer")
                    }
                    Ok(n) => {
                        self.ctx.stats.bytes_received(n);
                        if let Some(closed) = self.process_input().await {
                            return closed;
                        }
                        Vec::new()
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.transport_error(HubError::Transport(e));
                        self.state.on_transport_closed(&reason)
                    }
                },

                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = self.send_message(message).await {
                            return self.abort(e);
                        }
                        Vec::new()
                    }
                    Some(Command::Close { code, reason }) => {
                        self.state.close(code, &reason, Instant::now())
                    }
                    None => {
                        self.commands_open = false;
                        Vec::new()
                    }
                },

                _ = timer => {
                    let actions = self.state.on_tick(Instant::now());
                    match self.state.ready_state() {
                        ReadyState::Closed => {
                            debug!(connection_id = %self.conn.id(), "timer expired, releasing connection")
                        }
                        _ if !actions.is_empty() => trace!(connection_id = %self.conn.id(), "heartbeat ping"),
                        _ => {}
                    }
                    actions
                }
            };

            if let Some(closed) = self.apply(actions).await {
                return closed;
            }
        }
    }

    /// Decode and handle every complete frame in the read buffer.
    async fn process_input(&mut self) -> Option<CloseFrame> {
        if !self.decoding {
            self.read_buf.clear();
            return None;
        }
        loop {
            let frame = match self.codec.decode_frame(&mut self.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(error) => return self.reject(error).await,
            };
            match self.state.on_frame(frame, Instant::now()) {
                Ok(actions) => {
                    if let Some(closed) = self.apply(actions).await {
                        return Some(closed);
                    }
                }
                Err(error) => return self.reject(error).await,
            }
        }
    }

    /// Fail the connection on a codec or protocol violation; later input is
    /// discarded.
    async fn reject(&mut self, error: HubError) -> Option<CloseFrame> {
        self.decoding = false;
        self.read_buf.clear();
        self.ctx.stats.frame_error();
        warn!(connection_id = %self.conn.id(), error = %error, "frame rejected");
        let actions = self.state.on_error(&error);
        self.notify_error(&error);
        self.apply(actions).await
    }

    /// Carry out state-machine actions in order; `Some` once CLOSED.
    async fn apply(&mut self, actions: Vec<Action>) -> Option<CloseFrame> {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Deliver(message) => {
                    self.ctx.stats.message_received();
                    let handler = &self.ctx.handler;
                    let conn = &self.conn;
                    if let Err(error) = guarded(|| handler.on_message(conn, message)) {
                        queue.extend(self.application_error(error));
                    }
                }
                Action::Send(frame) => {
                    if let Err(e) = self.write_frame(&frame).await {
                        return Some(self.abort(e));
                    }
                }
                Action::Release(close) => {
                    self.publish();
                    return Some(close);
                }
            }
            self.publish();
        }
        None
    }

    async fn send_message(&mut self, message: Message) -> std::io::Result<()> {
        if self.state.ready_state() != ReadyState::Open {
            debug!(connection_id = %self.conn.id(), "dropping message queued after close");
            return Ok(());
        }
        let bytes = FrameCodec::encode(message.opcode(), message.as_bytes());
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.ctx.stats.bytes_sent(bytes.len());
        self.ctx.stats.message_sent();
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        let mut out = BytesMut::with_capacity(frame.payload.len() + 14);
        FrameCodec::encode_frame(frame, &mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        self.ctx.stats.bytes_sent(out.len());
        Ok(())
    }

    /// A write failed: the socket is unusable.
    fn abort(&mut self, e: std::io::Error) -> CloseFrame {
        let reason = e.to_string();
        self.transport_error(HubError::Transport(e));
        self.state.on_transport_closed(&reason);
        self.publish();
        CloseFrame::abnormal(reason)
    }

    fn transport_error(&self, error: HubError) {
        self.ctx.stats.transport_error();
        debug!(connection_id = %self.conn.id(), error = %error, "transport error");
        self.notify_error(&error);
    }

    /// Log and count a handler failure; returns the close actions if the
    /// config asks for one.
    fn application_error(&mut self, error: HubError) -> Vec<Action> {
        self.ctx.stats.application_error();
        warn!(connection_id = %self.conn.id(), error = %error, "handler failed");
        self.notify_error(&error);
        if self.ctx.config.close_on_handler_error {
            self.state
                .close(CloseCode::Internal, "internal error", Instant::now())
        } else {
            Vec::new()
        }
    }

    fn notify_error(&self, error: &HubError) {
        let handler = &self.ctx.handler;
        let conn = &self.conn;
        let _ = guarded(|| {
            handler.on_error(conn, error);
            Ok(())
        });
    }

    fn publish(&self) {
        self.conn.set_ready_state(self.state.ready_state());
    }

    async fn finish(mut self, closed: CloseFrame) {
        self.conn.set_ready_state(ReadyState::Closed);
        let _ = self.stream.shutdown().await;

        let id = self.conn.id();
        self.ctx.registry.remove(id);
        let left = self.ctx.rooms.leave_all(id);
        self.ctx.stats.connection_closed();
        info!(
            connection_id = %id,
            code = %closed.code,
            reason = %closed.reason,
            rooms_left = left.len(),
            "connection closed"
        );

        let handler = &self.ctx.handler;
        let conn = &self.conn;
        let _ = guarded(|| {
            handler.on_close(conn, &closed);
            Ok(())
        });
    }
}
