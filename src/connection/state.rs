//! Per-connection state machine
//!
//! `ConnectionState` is pure: it consumes decoded frames, application close
//! requests and clock ticks, and answers with [`Action`]s for the driver to
//! carry out. It never touches the socket, which keeps every transition
//! testable without I/O.
//!
//! ```text
//! CONNECTING --open--> OPEN --our CLOSE--> CLOSING --peer CLOSE / timeout--> CLOSED
//!                        |                                                    ^
//!                        +--peer CLOSE (echoed) / failure / transport / idle -+
//! ```

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::config::HubConfig;
use crate::protocol::{parse_close_payload, Frame, Opcode};
use crate::types::{CloseCode, CloseFrame, HubError, HubResult, Message, ReadyState};

/// Timers that drive liveness and the closing handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Silence before a heartbeat PING; `None` disables heartbeats
    pub idle: Option<Duration>,
    /// Silence tolerated after the heartbeat PING
    pub ping_grace: Duration,
    /// Time the peer has to answer our CLOSE
    pub close: Duration,
}

impl From<&HubConfig> for Timeouts {
    fn from(config: &HubConfig) -> Self {
        Self {
            idle: config.idle_timeout(),
            ping_grace: config.ping_grace(),
            close: config.close_timeout(),
        }
    }
}

/// What the driver must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand a complete message to the application
    Deliver(Message),
    /// Write a frame to the socket
    Send(Frame),
    /// Release the socket; the connection is now CLOSED
    Release(CloseFrame),
}

#[derive(Debug)]
struct Fragment {
    opcode: Opcode,
    data: BytesMut,
}

#[derive(Debug)]
enum Phase {
    Connecting,
    Open {
        fragment: Option<Fragment>,
        ping_sent_at: Option<Instant>,
    },
    Closing {
        deadline: Instant,
        sent: CloseFrame,
    },
    Closed,
}

/// Lifecycle, fragment reassembly and liveness of one connection
#[derive(Debug)]
pub struct ConnectionState {
    phase: Phase,
    max_message_size: usize,
    timeouts: Timeouts,
    last_activity: Instant,
}

impl ConnectionState {
    pub fn new(max_message_size: usize, timeouts: Timeouts, now: Instant) -> Self {
        Self {
            phase: Phase::Connecting,
            max_message_size,
            timeouts,
            last_activity: now,
        }
    }

    /// CONNECTING -> OPEN, once the handshake response is written
    pub fn open(&mut self, now: Instant) {
        if matches!(self.phase, Phase::Connecting) {
            self.phase = Phase::Open {
                fragment: None,
                ping_sent_at: None,
            };
            self.last_activity = now;
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        match self.phase {
            Phase::Connecting => ReadyState::Connecting,
            Phase::Open { .. } => ReadyState::Open,
            Phase::Closing { .. } => ReadyState::Closing,
            Phase::Closed => ReadyState::Closed,
        }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether a fragmented message is being reassembled
    pub fn has_pending_fragment(&self) -> bool {
        matches!(
            self.phase,
            Phase::Open {
                fragment: Some(_),
                ..
            }
        )
    }

    /// Next instant at which [`on_tick`](Self::on_tick) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Open { ping_sent_at, .. } => self.timeouts.idle.map(|idle| match ping_sent_at {
                Some(sent) => *sent + self.timeouts.ping_grace,
                None => self.last_activity + idle,
            }),
            Phase::Closing { deadline, .. } => Some(*deadline),
            Phase::Connecting | Phase::Closed => None,
        }
    }

    /// Feed one decoded frame.
    ///
    /// A violation (bad fragment sequence, oversized or non-UTF-8 message,
    /// malformed CLOSE body) drops any partial message and is returned as an
    /// error; hand it to [`on_error`](Self::on_error) to fail the connection.
    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> HubResult<Vec<Action>> {
        self.last_activity = now;
        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        let result = match phase {
            Phase::Open { fragment, .. } => self.open_frame(fragment, frame),
            Phase::Closing { deadline, sent } => {
                if frame.opcode == Opcode::Close {
                    // Peer answered our CLOSE
                    Ok((Phase::Closed, vec![Action::Release(sent)]))
                } else {
                    // Data and pings are discarded once we are closing
                    Ok((Phase::Closing { deadline, sent }, Vec::new()))
                }
            }
            other => Ok((other, Vec::new())),
        };
        match result {
            Ok((next, actions)) => {
                self.phase = next;
                Ok(actions)
            }
            Err(e) => {
                self.phase = Phase::Open {
                    fragment: None,
                    ping_sent_at: None,
                };
                Err(e)
            }
        }
    }

    /// Fail the connection after a codec or protocol error.
    pub fn on_error(&mut self, error: &HubError) -> Vec<Action> {
        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        let (next, actions) = match phase {
            Phase::Open { .. } => self.fail(error),
            Phase::Closing { sent, .. } => (Phase::Closed, vec![Action::Release(sent)]),
            Phase::Connecting => (
                Phase::Closed,
                vec![Action::Release(CloseFrame::new(
                    error.close_code(),
                    error.to_string(),
                ))],
            ),
            Phase::Closed => (Phase::Closed, Vec::new()),
        };
        self.phase = next;
        actions
    }

    /// Start a close handshake on behalf of the application.
    pub fn close(&mut self, code: CloseCode, reason: &str, now: Instant) -> Vec<Action> {
        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        let (next, actions) = match phase {
            Phase::Open { .. } => {
                let sent = CloseFrame::new(code, reason);
                (
                    Phase::Closing {
                        deadline: now + self.timeouts.close,
                        sent,
                    },
                    vec![Action::Send(Frame::close(code, reason))],
                )
            }
            Phase::Connecting => (
                Phase::Closed,
                vec![Action::Release(CloseFrame::new(code, reason))],
            ),
            other => (other, Vec::new()),
        };
        self.phase = next;
        actions
    }

    /// The transport is gone (EOF or I/O error); no CLOSE can be exchanged.
    pub fn on_transport_closed(&mut self, reason: &str) -> Vec<Action> {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Closed => Vec::new(),
            _ => vec![Action::Release(CloseFrame::abnormal(reason))],
        }
    }

    /// Advance timers: heartbeat PING, idle close and close-handshake timeout.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Action> {
        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        let (next, actions) = match phase {
            Phase::Open {
                fragment,
                ping_sent_at,
            } => match (self.timeouts.idle, ping_sent_at) {
                (Some(_), Some(sent)) if now >= sent + self.timeouts.ping_grace => {
                    let close = CloseFrame::new(CloseCode::GoingAway, "idle timeout");
                    (
                        Phase::Closed,
                        vec![
                            Action::Send(Frame::close(close.code, &close.reason)),
                            Action::Release(close),
                        ],
                    )
                }
                (Some(idle), None) if now >= self.last_activity + idle => (
                    Phase::Open {
                        fragment,
                        ping_sent_at: Some(now),
                    },
                    vec![Action::Send(Frame::new(Opcode::Ping, Bytes::new()))],
                ),
                _ => (
                    Phase::Open {
                        fragment,
                        ping_sent_at,
                    },
                    Vec::new(),
                ),
            },
            Phase::Closing { deadline, sent } if now >= deadline => {
                (Phase::Closed, vec![Action::Release(sent)])
            }
            other => (other, Vec::new()),
        };
        self.phase = next;
        actions
    }

    fn open_frame(
        &self,
        fragment: Option<Fragment>,
        frame: Frame,
    ) -> HubResult<(Phase, Vec<Action>)> {
        let open = |fragment| Phase::Open {
            fragment,
            ping_sent_at: None,
        };
        match frame.opcode {
            Opcode::Ping => Ok((
                open(fragment),
                vec![Action::Send(Frame::new(Opcode::Pong, frame.payload))],
            )),
            Opcode::Pong => Ok((open(fragment), Vec::new())),
            Opcode::Close => peer_close(&frame.payload),
            Opcode::Text | Opcode::Binary => {
                if fragment.is_some() {
                    return Err(HubError::protocol("expected a continuation frame"));
                }
                if frame.fin {
                    let message = complete(frame.opcode, frame.payload)?;
                    return Ok((open(None), vec![Action::Deliver(message)]));
                }
                let started = Fragment {
                    opcode: frame.opcode,
                    data: BytesMut::from(&frame.payload[..]),
                };
                Ok((open(Some(started)), Vec::new()))
            }
            Opcode::Continuation => {
                let Some(mut partial) = fragment else {
                    return Err(HubError::protocol("continuation without a started message"));
                };
                let size = partial.data.len() + frame.payload.len();
                if size > self.max_message_size {
                    return Err(HubError::PayloadTooLarge {
                        size: size as u64,
                        max: self.max_message_size,
                    });
                }
                partial.data.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok((open(Some(partial)), Vec::new()));
                }
                let message = complete(partial.opcode, partial.data.freeze())?;
                Ok((open(None), vec![Action::Deliver(message)]))
            }
        }
    }

    /// Fail the connection: send a CLOSE carrying the error's status and
    /// release the socket without waiting for an answer.
    fn fail(&self, error: &HubError) -> (Phase, Vec<Action>) {
        let close = CloseFrame::new(error.close_code(), error.to_string());
        (
            Phase::Closed,
            vec![
                Action::Send(Frame::close(close.code, &close.reason)),
                Action::Release(close),
            ],
        )
    }
}

/// Peer started the close handshake while we were OPEN: echo its status and
/// finish.
fn peer_close(payload: &[u8]) -> HubResult<(Phase, Vec<Action>)> {
    let actions = match parse_close_payload(payload)? {
        Some(close) => vec![
            Action::Send(Frame::close(close.code, "")),
            Action::Release(close),
        ],
        None => vec![
            Action::Send(Frame::close_empty()),
            Action::Release(CloseFrame::new(CloseCode::NoStatus, "")),
        ],
    };
    Ok((Phase::Closed, actions))
}

fn complete(opcode: Opcode, payload: Bytes) -> Result<Message, HubError> {
    match opcode {
        Opcode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| HubError::InvalidUtf8),
        _ => Ok(Message::Binary(payload)),
    }
}
