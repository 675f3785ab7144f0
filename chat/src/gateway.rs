//! Per-connection gateway between a client socket and the chat service.

use crate::error::{ChatError, ChatResult};
use crate::events::{ClientEvent, ServerEvent};
use crate::hub::{ConnectionHandle, ConnectionId};
use crate::model::Identity;
use crate::service::ChatService;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Limits applied to each live connection.
#[derive(Clone, Copy, Debug)]
pub struct GatewaySettings {
    /// Events buffered for a connection before deliveries to it start failing.
    pub outbound_capacity: usize,
    /// Longest a single socket write may take before the connection is dropped.
    pub write_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// One authenticated live connection.
///
/// The session is registered with the hub for its whole lifetime; dropping it
/// removes the connection from every room, whatever the reason for the drop.
pub struct Session {
    service: ChatService,
    identity: Identity,
    handle: ConnectionHandle,
}

impl Session {
    /// Register a new connection for an authenticated user.
    pub fn connect(
        service: ChatService,
        identity: Identity,
        outbound_capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (handle, rx) = ConnectionHandle::new(identity.user_id, outbound_capacity);
        service.hub().register(&handle);
        tracing::info!(conn_id = %handle.id(), user_id = identity.user_id, "connection opened");
        (
            Self {
                service,
                identity,
                handle,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn handle_event(&self, event: ClientEvent) -> ChatResult<()> {
        match event {
            ClientEvent::JoinRoom { room, .. } => self.join_room(&room).await,
            ClientEvent::LeaveRoom { room, .. } => self.leave_room(&room).await,
            ClientEvent::SendMessage { room, msg, .. } => self.send_message(&room, &msg).await,
        }
    }

    /// Join durably, subscribe this connection and announce the arrival.
    pub async fn join_room(&self, room: &str) -> ChatResult<()> {
        let (room, _) = self.service.join(self.identity.user_id, room).await?;
        self.service.subscribe(&room, &self.handle).await?;
        self.service.hub().broadcast(
            room.id,
            ServerEvent::joined(&self.identity.display_name, &room.name),
        );
        Ok(())
    }

    /// Stop receiving a room's events. The durable membership stays.
    ///
    /// The departure is only announced when this connection was actually
    /// subscribed.
    pub async fn leave_room(&self, room: &str) -> ChatResult<()> {
        let room = self.service.room_by_name(room).await?;
        let hub = self.service.hub();
        if !hub.unsubscribe(room.id, self.id()) {
            return Ok(());
        }
        hub.broadcast(
            room.id,
            ServerEvent::left(&self.identity.display_name, &room.name),
        );
        Ok(())
    }

    /// Log the message, then fan it out to the room (this connection included).
    pub async fn send_message(&self, room: &str, text: &str) -> ChatResult<()> {
        let (room, message) = self
            .service
            .append_message(&self.identity, room, text)
            .await?;
        self.service.hub().broadcast(
            room.id,
            ServerEvent::chat(&self.identity.display_name, &message.text),
        );
        Ok(())
    }

    /// Process one raw text frame. Failures are reported back to this
    /// connection only.
    pub async fn handle_text(&self, text: &str) {
        let result = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                tracing::debug!(conn_id = %self.id(), error = %e, "unparseable client event");
                self.reply_error("invalid_event");
                return;
            }
        };
        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn report(&self, err: &ChatError) {
        tracing::debug!(conn_id = %self.id(), user_id = self.identity.user_id, error = %err, "event rejected");
        self.reply_error(err.code());
    }

    fn reply_error(&self, code: &str) {
        let event = Arc::new(ServerEvent::Error { msg: code.into() });
        if let Err(e) = self.handle.deliver(event) {
            tracing::warn!(conn_id = %self.id(), error = %e, "delivery failed");
        }
    }

    /// End the session and leave every room.
    pub fn terminate(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        let rooms = self.service.hub().disconnect(self.handle.id());
        tracing::info!(
            conn_id = %self.handle.id(),
            user_id = self.identity.user_id,
            rooms = rooms.len(),
            "connection closed"
        );
    }
}

/// Drive a websocket for an authenticated user until either side goes away.
pub async fn serve_socket(
    socket: WebSocket,
    service: ChatService,
    identity: Identity,
    settings: GatewaySettings,
) {
    let (session, outbound) = Session::connect(service, identity, settings.outbound_capacity);
    let (sender, receiver) = socket.split();
    drive(session, outbound, receiver, sender, settings).await;
}

/// Write queued events to the sink until the queue closes or a write fails.
/// A write slower than `write_timeout` counts as failed.
async fn write_events<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<ServerEvent>>,
    write_timeout: Duration,
    conn_id: ConnectionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(event) = outbound.recv().await {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%conn_id, error = %e, "failed to encode event");
                continue;
            }
        };
        match tokio::time::timeout(write_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(%conn_id, "socket write timed out");
                return;
            }
        }
    }
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

/// Run the reader loop and the writer task for one session. The session is
/// terminated, and so leaves every room, when either side stops.
async fn drive<St, Si, E>(
    session: Session,
    outbound: mpsc::Receiver<Arc<ServerEvent>>,
    mut receiver: St,
    sender: Si,
    settings: GatewaySettings,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: std::fmt::Display,
{
    let conn_id = session.id();
    let mut writer = tokio::spawn(write_events(
        sender,
        outbound,
        settings.write_timeout,
        conn_id,
    ));

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "socket read failed");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            _ = &mut writer => break,
        }
    }

    session.terminate();
    writer.abort();
}
