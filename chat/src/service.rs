use crate::db::{self, DbPool};
use crate::error::{ChatError, ChatResult};
use crate::events::ServerEvent;
use crate::hub::{ConnectionHandle, RoomHub};
use crate::model::{
    HistoryLine, Identity, Message, Room, RoomListing, RoomSummary, User, UserId,
};
use crate::{auth, members, messages, rooms};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

/// Process-wide chat service: the database pool plus the live room hub.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
#[derive(Clone)]
pub struct ChatService {
    pool: DbPool,
    hub: Arc<RoomHub>,
}

impl ChatService {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            hub: Arc::new(RoomHub::new()),
        }
    }

    /// Open (or create) the database file and start with an empty hub.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> ChatResult<Self> {
        Ok(Self::new(db::open_pool(path, pool_size)?))
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run blocking database work on the blocking thread pool.
    async fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await
        .map_err(ChatError::from)
        .and_then(|r| r);
        if let Err(e) = &res {
            if e.is_fatal() {
                tracing::error!(error = %e, "storage failure");
            }
        }
        res
    }

    pub async fn register(
        &self,
        full_name: &str,
        login_handle: &str,
        password: &str,
    ) -> ChatResult<UserId> {
        let (full_name, login_handle, password) =
            (full_name.to_owned(), login_handle.to_owned(), password.to_owned());
        let id = self
            .with_conn(move |conn| auth::register(conn, &full_name, &login_handle, &password))
            .await?;
        tracing::info!(user_id = id, "user registered");
        Ok(id)
    }

    /// Check credentials and return the user they belong to.
    pub async fn login(&self, login_handle: &str, password: &str) -> ChatResult<User> {
        let (login_handle, password) = (login_handle.to_owned(), password.to_owned());
        self.with_conn(move |conn| {
            let id = auth::verify(conn, &login_handle, &password)?;
            auth::get_user(conn, id)
        })
        .await
    }

    pub async fn user(&self, id: UserId) -> ChatResult<User> {
        self.with_conn(move |conn| auth::get_user(conn, id)).await
    }

    /// Join a room by name, creating it if needed.
    ///
    /// Membership is recorded durably. When this call created the room a
    /// `room_created` announcement goes to every live connection.
    pub async fn join(&self, user_id: UserId, room_name: &str) -> ChatResult<(Room, bool)> {
        let name = room_name.to_owned();
        let (room, created) = self
            .with_conn(move |conn| {
                let (room, created) = rooms::get_or_create(conn, &name, user_id)?;
                members::join(conn, user_id, room.id)?;
                Ok((room, created))
            })
            .await?;
        if created {
            tracing::info!(room_id = room.id, user_id, room = %room.name, "room created");
            self.hub.broadcast_global(ServerEvent::RoomCreated {
                room: room.name.clone(),
                creator_id: user_id,
            });
        }
        Ok((room, created))
    }

    /// Add a live connection to a room's subscriber set.
    ///
    /// The room is looked up again after subscribing. A delete commits before
    /// it evicts, so a subscription that lands after the eviction always sees
    /// the row gone here and is rolled back.
    pub async fn subscribe(&self, room: &Room, handle: &ConnectionHandle) -> ChatResult<bool> {
        let added = self.hub.subscribe(room.id, handle);
        let room_id = room.id;
        let still_there = self
            .with_conn(move |conn| rooms::get_room(conn, room_id))
            .await;
        match still_there {
            Ok(Some(_)) => Ok(added),
            Ok(None) => {
                self.hub.unsubscribe(room_id, handle.id());
                Err(ChatError::RoomNotFound)
            }
            Err(e) => {
                self.hub.unsubscribe(room_id, handle.id());
                Err(e)
            }
        }
    }

    /// Drop the durable membership. Live subscriptions are left alone.
    pub async fn leave(&self, user_id: UserId, room_name: &str) -> ChatResult<Room> {
        let room = self.room_by_name(room_name).await?;
        let room_id = room.id;
        self.with_conn(move |conn| members::leave(conn, user_id, room_id))
            .await?;
        Ok(room)
    }

    /// Delete a room and everything in it. Only its creator may do this.
    ///
    /// Every live connection subscribed to the room is force-unsubscribed
    /// before the `room_deleted` announcement goes out.
    pub async fn delete_room(&self, user_id: UserId, room_name: &str) -> ChatResult<Room> {
        let room = self.room_by_name(room_name).await?;
        let room_id = room.id;
        let room = self
            .with_conn(move |conn| rooms::delete_room(conn, room_id, user_id))
            .await?;
        let evicted = self.hub.evict_room(room.id);
        tracing::info!(room_id = room.id, user_id, evicted = evicted.len(), "room deleted");
        self.hub.broadcast_global(ServerEvent::RoomDeleted {
            room: room.name.clone(),
        });
        Ok(room)
    }

    pub async fn room_by_name(&self, room_name: &str) -> ChatResult<Room> {
        let name = room_name.to_owned();
        self.with_conn(move |conn| rooms::find_by_name(conn, &name))
            .await?
            .ok_or(ChatError::RoomNotFound)
    }

    /// All rooms plus the ones this user has joined.
    pub async fn list_rooms(&self, user_id: UserId) -> ChatResult<RoomListing> {
        self.with_conn(move |conn| {
            let rooms = rooms::list_rooms(conn)?
                .into_iter()
                .map(RoomSummary::from)
                .collect();
            let joined = members::list_rooms_for(conn, user_id)?;
            Ok(RoomListing { rooms, joined })
        })
        .await
    }

    pub async fn history(&self, room_name: &str) -> ChatResult<Vec<HistoryLine>> {
        let name = room_name.to_owned();
        self.with_conn(move |conn| {
            let room = rooms::find_by_name(conn, &name)?.ok_or(ChatError::RoomNotFound)?;
            Ok(messages::history(conn, room.id)?
                .iter()
                .map(|e| HistoryLine {
                    display_text: e.display_text(),
                })
                .collect())
        })
        .await
    }

    /// Persist a message from a member of the room, stamped with the current time.
    pub async fn append_message(
        &self,
        sender: &Identity,
        room_name: &str,
        text: &str,
    ) -> ChatResult<(Room, Message)> {
        let (name, text) = (room_name.to_owned(), text.to_owned());
        let sender_id = sender.user_id;
        self.with_conn(move |conn| {
            let room = rooms::find_by_name(conn, &name)?.ok_or(ChatError::RoomNotFound)?;
            if !members::is_member(conn, sender_id, room.id)? {
                return Err(ChatError::NotMember);
            }
            let now = OffsetDateTime::now_utc().unix_timestamp();
            let message = messages::append(conn, room.id, sender_id, &text, now)?;
            Ok((room, message))
        })
        .await
    }
}
