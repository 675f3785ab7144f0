use crate::model::UserId;
use serde::{Deserialize, Serialize};

/// Events a client sends over its live connection.
///
/// `username` is accepted for compatibility with older clients; the
/// authenticated identity of the connection is what gets announced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room: String,
        #[serde(default)]
        username: Option<String>,
    },
    LeaveRoom {
        room: String,
        #[serde(default)]
        username: Option<String>,
    },
    SendMessage {
        room: String,
        #[serde(default)]
        username: Option<String>,
        msg: String,
    },
}

/// Events pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Message { msg: String },
    RoomCreated { room: String, creator_id: UserId },
    RoomDeleted { room: String },
    Error { msg: String },
}

impl ServerEvent {
    pub fn joined(user: &str, room: &str) -> Self {
        ServerEvent::Message {
            msg: format!("{user} joined {room}"),
        }
    }

    pub fn left(user: &str, room: &str) -> Self {
        ServerEvent::Message {
            msg: format!("{user} left {room}"),
        }
    }

    pub fn chat(user: &str, text: &str) -> Self {
        ServerEvent::Message {
            msg: format!("{user}: {text}"),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
