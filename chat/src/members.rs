use crate::error::{ChatError, ChatResult};
use crate::model::{RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

/// Record that a user is a member of a room. Re-joining is a no-op.
pub fn join(conn: &Connection, user_id: UserId, room_id: RoomId) -> ChatResult<()> {
    let res = conn.execute(
        "INSERT OR IGNORE INTO room_members (user_id, room_id) VALUES (?1, ?2)",
        params![user_id, room_id],
    );
    match res {
        Ok(_) => Ok(()),
        // OR IGNORE does not cover foreign key failures
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

/// Remove a membership. Leaving a room one is not in is a no-op.
pub fn leave(conn: &Connection, user_id: UserId, room_id: RoomId) -> ChatResult<()> {
    conn.execute(
        "DELETE FROM room_members WHERE user_id = ?1 AND room_id = ?2",
        params![user_id, room_id],
    )?;
    Ok(())
}

pub fn is_member(conn: &Connection, user_id: UserId, room_id: RoomId) -> ChatResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM room_members WHERE user_id = ?1 AND room_id = ?2",
            params![user_id, room_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub fn list_members(conn: &Connection, room_id: RoomId) -> ChatResult<HashSet<UserId>> {
    let mut stmt = conn.prepare("SELECT user_id FROM room_members WHERE room_id = ?1")?;
    let ids = stmt
        .query_map([room_id], |row| row.get(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Rooms the user has joined.
pub fn list_rooms_for(conn: &Connection, user_id: UserId) -> ChatResult<HashSet<RoomId>> {
    let mut stmt = conn.prepare("SELECT room_id FROM room_members WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth, db, rooms};

    #[test]
    fn join_is_idempotent() {
        let mut conn = db::init_db(":memory:").unwrap();
        let alice = auth::register(&conn, "Alice", "alice", "pw").unwrap();
        let (room, _) = rooms::get_or_create(&mut conn, "general", alice).unwrap();
        join(&conn, alice, room.id).unwrap();
        join(&conn, alice, room.id).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM room_members WHERE user_id = ?1 AND room_id = ?2",
                params![alice, room.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(is_member(&conn, alice, room.id).unwrap());
    }

    #[test]
    fn leave_and_listings() {
        let mut conn = db::init_db(":memory:").unwrap();
        let alice = auth::register(&conn, "Alice", "alice", "pw").unwrap();
        let bob = auth::register(&conn, "Bob", "bob", "pw").unwrap();
        let (general, _) = rooms::get_or_create(&mut conn, "general", alice).unwrap();
        let (random, _) = rooms::get_or_create(&mut conn, "random", bob).unwrap();
        join(&conn, alice, general.id).unwrap();
        join(&conn, bob, general.id).unwrap();
        join(&conn, alice, random.id).unwrap();

        assert_eq!(
            list_members(&conn, general.id).unwrap(),
            HashSet::from([alice, bob])
        );
        assert_eq!(
            list_rooms_for(&conn, alice).unwrap(),
            HashSet::from([general.id, random.id])
        );

        leave(&conn, alice, general.id).unwrap();
        leave(&conn, alice, general.id).unwrap();
        assert!(!is_member(&conn, alice, general.id).unwrap());
        assert_eq!(list_rooms_for(&conn, alice).unwrap(), HashSet::from([random.id]));
    }

    #[test]
    fn join_unknown_room_fails() {
        let conn = db::init_db(":memory:").unwrap();
        let alice = auth::register(&conn, "Alice", "alice", "pw").unwrap();
        assert!(matches!(join(&conn, alice, 42), Err(ChatError::RoomNotFound)));
    }
}
