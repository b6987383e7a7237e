//! Demo JSON chat protocol served on `/ws` by the binary

use serde::{Deserialize, Serialize};

use crate::connection::{Connection, MessageHandler};
use crate::types::{CloseFrame, HandlerResult, Message};

/// Commands a chat client sends
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    /// Join a room
    Join { room: String },

    /// Leave a room
    Leave { room: String },

    /// Say something to everyone else in a room
    Say { room: String, text: String },

    /// Application-level ping
    Ping,
}

/// Events the server sends back
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Welcome { connection_id: u64 },
    Joined { room: String },
    Left { room: String },
    Message { room: String, from: u64, text: String },
    Pong,
    Error { message: String },
}

impl ChatEvent {
    fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error {
            message: message.into(),
        }
    }
}

/// Room chat over JSON text messages
#[derive(Debug, Default)]
pub struct ChatHandler;

impl ChatHandler {
    pub fn new() -> Self {
        Self
    }

    fn reply(conn: &Connection, event: &ChatEvent) -> HandlerResult {
        conn.send(serde_json::to_string(event)?)?;
        Ok(())
    }

    fn handle(&self, conn: &Connection, command: ChatCommand) -> HandlerResult {
        let event = match command {
            ChatCommand::Join { room } => match conn.join(&room) {
                Ok(_) => ChatEvent::Joined { room },
                Err(e) => ChatEvent::error(e.to_string()),
            },
            ChatCommand::Leave { room } => {
                if conn.leave(&room) {
                    ChatEvent::Left { room }
                } else {
                    ChatEvent::error(format!("not a member of {room}"))
                }
            }
            ChatCommand::Say { room, text } => {
                if !conn.rooms().contains(&room) {
                    ChatEvent::error(format!("not a member of {room}"))
                } else {
                    let event = ChatEvent::Message {
                        room: room.clone(),
                        from: conn.id().0,
                        text,
                    };
                    let delivered = conn.broadcast(&room, serde_json::to_string(&event)?);
                    tracing::debug!(connection_id = %conn.id(), room = %room, delivered, "chat message");
                    return Ok(());
                }
            }
            ChatCommand::Ping => ChatEvent::Pong,
        };
        Self::reply(conn, &event)
    }
}

impl MessageHandler for ChatHandler {
    fn on_open(&self, conn: &Connection) -> HandlerResult {
        Self::reply(
            conn,
            &ChatEvent::Welcome {
                connection_id: conn.id().0,
            },
        )
    }

    fn on_message(&self, conn: &Connection, message: Message) -> HandlerResult {
        let Some(text) = message.as_text() else {
            return Self::reply(conn, &ChatEvent::error("binary messages are not supported"));
        };
        match serde_json::from_str::<ChatCommand>(text) {
            Ok(command) => self.handle(conn, command),
            Err(e) => Self::reply(conn, &ChatEvent::error(format!("invalid command: {e}"))),
        }
    }

    fn on_close(&self, conn: &Connection, close: &CloseFrame) {
        tracing::debug!(connection_id = %conn.id(), code = %close.code, "chat client left");
    }
}
