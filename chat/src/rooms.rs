pub use crate::model::Room;
use crate::error::{ChatError, ChatResult};
use crate::model::{RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        created_by: row.get(3)?,
    })
}

/// Fetch the room with the given name, creating it if absent.
///
/// Returns the room and whether this call created it. The insert relies on
/// the UNIQUE constraint on `rooms.name` inside an IMMEDIATE transaction, so
/// concurrent callers racing on the same unseen name all observe one row and
/// exactly one of them gets `true`.
pub fn get_or_create(conn: &mut Connection, name: &str, creator: UserId) -> ChatResult<(Room, bool)> {
    if name.trim().is_empty() {
        return Err(ChatError::InvalidRoomName);
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let inserted = tx.execute(
        "INSERT INTO rooms (name, created_at, created_by) VALUES (?1, ?2, ?3) ON CONFLICT(name) DO NOTHING",
        params![name, now, creator],
    )?;
    let room = tx.query_row(
        "SELECT id, name, created_at, created_by FROM rooms WHERE name = ?1",
        [name],
        row_to_room,
    )?;
    tx.commit()?;
    Ok((room, inserted == 1))
}

pub fn find_by_name(conn: &Connection, name: &str) -> ChatResult<Option<Room>> {
    let room = conn
        .query_row(
            "SELECT id, name, created_at, created_by FROM rooms WHERE name = ?1",
            [name],
            row_to_room,
        )
        .optional()?;
    Ok(room)
}

pub fn get_room(conn: &Connection, id: RoomId) -> ChatResult<Option<Room>> {
    let room = conn
        .query_row(
            "SELECT id, name, created_at, created_by FROM rooms WHERE id = ?1",
            [id],
            row_to_room,
        )
        .optional()?;
    Ok(room)
}

/// List all rooms in creation order.
pub fn list_rooms(conn: &Connection) -> ChatResult<Vec<Room>> {
    let mut stmt =
        conn.prepare("SELECT id, name, created_at, created_by FROM rooms ORDER BY created_at, id")?;
    let rooms = stmt
        .query_map([], row_to_room)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}

/// Delete a room together with its memberships and messages.
///
/// Only the creator may delete a room. Everything is removed by room id in a
/// single transaction.
pub fn delete_room(conn: &mut Connection, room_id: RoomId, requester: UserId) -> ChatResult<Room> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let room = tx
        .query_row(
            "SELECT id, name, created_at, created_by FROM rooms WHERE id = ?1",
            [room_id],
            row_to_room,
        )
        .optional()?
        .ok_or(ChatError::RoomNotFound)?;
    if room.created_by != requester {
        return Err(ChatError::NotCreator);
    }
    tx.execute("DELETE FROM messages WHERE room_id = ?1", [room_id])?;
    tx.execute("DELETE FROM room_members WHERE room_id = ?1", [room_id])?;
    tx.execute("DELETE FROM rooms WHERE id = ?1", [room_id])?;
    tx.commit()?;
    Ok(room)
}
