use crate::error::{ChatError, ChatResult};
use crate::model::{HistoryEntry, Message, MessageId, RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

/// Append a message to a room's log.
///
/// `sent_at` is clamped to the newest timestamp already stored for the room
/// so timestamps never decrease within a room. Returns the stored row.
pub fn append(
    conn: &Connection,
    room_id: RoomId,
    sender_id: UserId,
    text: &str,
    sent_at: i64,
) -> ChatResult<Message> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    let res = conn.execute(
        "INSERT INTO messages (room_id, sender_id, text, sent_at) \
         VALUES (?1, ?2, ?3, MAX(?4, COALESCE((SELECT MAX(sent_at) FROM messages WHERE room_id = ?1), ?4)))",
        params![room_id, sender_id, text, sent_at],
    );
    match res {
        Ok(_) => get_message(conn, conn.last_insert_rowid())?
            .ok_or(ChatError::Storage(rusqlite::Error::QueryReturnedNoRows)),
        Err(e) if crate::error::is_constraint_violation(&e) => {
            if crate::rooms::get_room(conn, room_id)?.is_none() {
                Err(ChatError::RoomNotFound)
            } else {
                Err(ChatError::UserNotFound)
            }
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_message(conn: &Connection, id: MessageId) -> ChatResult<Option<Message>> {
    let msg = conn
        .query_row(
            "SELECT id, room_id, sender_id, text, sent_at FROM messages WHERE id = ?1",
            [id],
            |row| {
                Ok(Message {
                    id: row.get(0)?,
                    room_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    text: row.get(3)?,
                    sent_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(msg)
}

/// Full history of a room, oldest first. Ties on `sent_at` keep insertion order.
pub fn history(conn: &Connection, room_id: RoomId) -> ChatResult<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT u.full_name, m.sent_at, m.text FROM messages m \
         JOIN users u ON u.id = m.sender_id \
         WHERE m.room_id = ?1 ORDER BY m.sent_at ASC, m.id ASC",
    )?;
    let entries = stmt
        .query_map([room_id], |row| {
            Ok(HistoryEntry {
                sender_display_name: row.get(0)?,
                sent_at: row.get(1)?,
                text: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth, db, rooms};

    fn setup() -> (Connection, UserId, RoomId) {
        let mut conn = db::init_db(":memory:").unwrap();
        let alice = auth::register(&conn, "Alice", "alice", "pw").unwrap();
        let (room, _) = rooms::get_or_create(&mut conn, "general", alice).unwrap();
        (conn, alice, room.id)
    }

    #[test]
    fn create_and_validate() {
        let (conn, alice, room) = setup();
        assert!(matches!(
            append(&conn, room, alice, "   ", 0),
            Err(ChatError::EmptyMessage)
        ));
        let msg = append(&conn, room, alice, "hi", 5).unwrap();
        assert_eq!(get_message(&conn, msg.id).unwrap(), Some(msg.clone()));
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.sent_at, 5);
        assert_eq!(msg.room_id, room);
    }

    #[test]
    fn history_orders_by_time_then_insertion() {
        let (conn, alice, room) = setup();
        let ten = 36_000;
        append(&conn, room, alice, "M1", ten).unwrap();
        append(&conn, room, alice, "M2", ten + 1).unwrap();
        append(&conn, room, alice, "M3", ten + 1).unwrap();
        let texts: Vec<_> = history(&conn, room)
            .unwrap()
            .into_iter()
            .map(|e| e.text)
            .collect();
        assert_eq!(texts, vec!["M1", "M2", "M3"]);
        // reading is side effect free
        assert_eq!(history(&conn, room).unwrap().len(), 3);
    }

    #[test]
    fn sent_at_never_goes_backwards() {
        let (conn, alice, room) = setup();
        append(&conn, room, alice, "late", 100).unwrap();
        let skewed = append(&conn, room, alice, "skewed", 50).unwrap();
        assert_eq!(skewed.sent_at, 100);
        let entries = history(&conn, room).unwrap();
        assert_eq!(entries[0].text, "late");
        assert_eq!(entries[1].text, "skewed");
        assert_eq!(entries[1].sender_display_name, "Alice");
    }

    #[test]
    fn unknown_room_rejected() {
        let (conn, alice, _) = setup();
        assert!(matches!(
            append(&conn, 999, alice, "hi", 0),
            Err(ChatError::RoomNotFound)
        ));
    }
}
