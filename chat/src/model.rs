use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::{macros::format_description, OffsetDateTime};

pub type UserId = i64;
pub type RoomId = i64;
pub type MessageId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub login_handle: String,
    pub role: String,
}

/// An authenticated caller: the user id plus the name shown to others.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            display_name: user.full_name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: i64,
    pub created_by: UserId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub text: String,
    pub sent_at: i64,
}

/// A message as shown in room history, joined with its sender's name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender_display_name: String,
    pub sent_at: i64,
    pub text: String,
}

impl HistoryEntry {
    /// `"<sender> (<timestamp>): <message>"`
    pub fn display_text(&self) -> String {
        format!(
            "{} ({}): {}",
            self.sender_display_name,
            format_timestamp(self.sent_at),
            self.text
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub display_text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_name: String,
    pub room_id: RoomId,
    pub created_by_user_id: UserId,
}

impl From<Room> for RoomSummary {
    fn from(room: Room) -> Self {
        Self {
            room_name: room.name,
            room_id: room.id,
            created_by_user_id: room.created_by,
        }
    }
}

/// All rooms plus the ids of the rooms the requesting user has joined.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomListing {
    pub rooms: Vec<RoomSummary>,
    pub joined: HashSet<RoomId>,
}

/// Format a unix timestamp as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(ts: i64) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(fmt).ok())
        .unwrap_or_else(|| ts.to_string())
}
