//! In-memory registry of live connections and their room subscriptions.
//!
//! The hub is the only component that touches live connections. All state
//! sits behind one lock; delivering an event is a non-blocking enqueue onto the
//! connection's bounded outbound queue, so holding the lock while fanning out
//! keeps per-room ordering without ever waiting on a socket.

use crate::events::ServerEvent;
use crate::model::{RoomId, UserId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Why an event could not be handed to a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Sending half of a live connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Arc<ServerEvent>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer drains.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Push an event directly to this connection, bypassing the hub.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

struct LiveConnection {
    handle: ConnectionHandle,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, LiveConnection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl HubState {
    fn remove_connection(&mut self, id: &ConnectionId) -> HashSet<RoomId> {
        let Some(conn) = self.connections.remove(id) else {
            return HashSet::new();
        };
        for room_id in &conn.rooms {
            if let Some(set) = self.rooms.get_mut(room_id) {
                set.remove(id);
                if set.is_empty() {
                    self.rooms.remove(room_id);
                }
            }
        }
        conn.rooms
    }

    /// Deliver to the given connections, returning how many accepted the event.
    /// Connections found closed are dropped from every room.
    fn fan_out<'a>(
        &mut self,
        targets: impl Iterator<Item = &'a ConnectionId>,
        event: &Arc<ServerEvent>,
        room_id: Option<RoomId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in targets {
            let Some(conn) = self.connections.get(id) else {
                continue;
            };
            match conn.handle.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = %id, user_id = conn.handle.user_id, ?room_id, error = %e, "delivery failed");
                    if e == DeliveryError::Closed {
                        dead.push(*id);
                    }
                }
            }
        }
        for id in dead {
            self.remove_connection(&id);
        }
        delivered
    }
}

/// Authoritative live fan-out for rooms.
#[derive(Default)]
pub struct RoomHub {
    state: Mutex<HubState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection known to the hub so it receives global announcements.
    pub fn register(&self, handle: &ConnectionHandle) {
        let mut state = self.state.lock();
        state
            .connections
            .entry(handle.id)
            .or_insert_with(|| LiveConnection {
                handle: handle.clone(),
                rooms: HashSet::new(),
            });
    }

    /// Remove a connection from the hub and from every room it was in.
    /// Returns the rooms it was subscribed to.
    pub fn disconnect(&self, id: ConnectionId) -> HashSet<RoomId> {
        self.state.lock().remove_connection(&id)
    }

    /// Add a connection to a room's live set. Returns false if already present.
    pub fn subscribe(&self, room_id: RoomId, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        let conn = state
            .connections
            .entry(handle.id)
            .or_insert_with(|| LiveConnection {
                handle: handle.clone(),
                rooms: HashSet::new(),
            });
        conn.rooms.insert(room_id);
        state.rooms.entry(room_id).or_default().insert(handle.id)
    }

    /// Remove a connection from a room's live set. Returns false if it was absent.
    pub fn unsubscribe(&self, room_id: RoomId, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        if let Some(conn) = state.connections.get_mut(&id) {
            conn.rooms.remove(&room_id);
        }
        let Some(set) = state.rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = set.remove(&id);
        if set.is_empty() {
            state.rooms.remove(&room_id);
        }
        removed
    }

    /// Send an event to every connection subscribed to the room, the sender
    /// included. Returns the number of connections that accepted it.
    pub fn broadcast(&self, room_id: RoomId, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut state = self.state.lock();
        let Some(targets) = state.rooms.get(&room_id) else {
            return 0;
        };
        let targets: Vec<ConnectionId> = targets.iter().copied().collect();
        state.fan_out(targets.iter(), &event, Some(room_id))
    }

    /// Send an event to every live connection regardless of subscriptions.
    pub fn broadcast_global(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut state = self.state.lock();
        let targets: Vec<ConnectionId> = state.connections.keys().copied().collect();
        state.fan_out(targets.iter(), &event, None)
    }

    /// Drop a room's whole live set, returning the evicted connections.
    pub fn evict_room(&self, room_id: RoomId) -> Vec<ConnectionId> {
        let mut state = self.state.lock();
        let Some(set) = state.rooms.remove(&room_id) else {
            return Vec::new();
        };
        for id in &set {
            if let Some(conn) = state.connections.get_mut(id) {
                conn.rooms.remove(&room_id);
            }
        }
        set.into_iter().collect()
    }

    pub fn subscribers(&self, room_id: RoomId) -> HashSet<ConnectionId> {
        self.state
            .lock()
            .rooms
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, id: ConnectionId) -> HashSet<RoomId> {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, room_id: RoomId, id: ConnectionId) -> bool {
        self.state
            .lock()
            .rooms
            .get(&room_id)
            .is_some_and(|set| set.contains(&id))
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}
