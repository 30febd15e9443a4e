//! Delivery of room effects to connections, timers and the leaderboard finalizer.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::{
    dto::ws::ServerMessage,
    services::{leaderboard_service, room_service},
    state::{
        AppState, SharedState,
        game::ConnectionId,
        registry::{RoomHandle, RoomSlot},
        room::RoomEffect,
    },
};

/// Carry out the effects of a room operation.
///
/// Must be called while the room lock is still held so that frames leave in the order the room
/// produced them.
pub fn dispatch(
    state: &SharedState,
    handle: &RoomHandle,
    slot: &mut RoomSlot,
    effects: Vec<RoomEffect>,
) {
    for effect in effects {
        match effect {
            RoomEffect::Send { to, message } => send_to_connection(state, to, &message),
            RoomEffect::Broadcast {
                recipients,
                message,
            } => broadcast(state, &recipients, &message),
            RoomEffect::ScheduleDeadline { key, at } => {
                let on_elapsed =
                    room_service::deadline_elapsed(state.clone(), Arc::downgrade(handle), key);
                slot.timer.schedule(key, at, on_elapsed);
            }
            RoomEffect::CancelDeadline => slot.timer.cancel(),
            RoomEffect::Finalize(delta) => leaderboard_service::enqueue(state, delta),
        }
    }
}

/// Queue `message` on one connection.
pub fn send_to_connection(state: &AppState, connection_id: ConnectionId, message: &ServerMessage) {
    if let Some(frame) = encode(message) {
        push_frame(state, connection_id, frame, message.event_name());
    }
}

/// Queue `message` on every recipient. The message is serialized once.
pub fn broadcast(state: &AppState, recipients: &[ConnectionId], message: &ServerMessage) {
    if recipients.is_empty() {
        return;
    }
    let Some(frame) = encode(message) else {
        return;
    };
    for connection_id in recipients {
        push_frame(state, *connection_id, frame.clone(), message.event_name());
    }
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match message.to_json() {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(event = message.event_name(), error = %err, "failed to serialize server message");
            None
        }
    }
}

/// Never blocks: a slow client loses the frame, a gone client loses its connection entry.
fn push_frame(state: &AppState, connection_id: ConnectionId, frame: Message, event: &str) {
    let Some(tx) = state
        .connections()
        .get(&connection_id)
        .map(|connection| connection.tx.clone())
    else {
        debug!(%connection_id, event, "dropping frame for unknown connection");
        return;
    };

    match tx.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(%connection_id, event, "outbound buffer full; dropping frame");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%connection_id, event, "writer closed; removing connection");
            state.connections().remove(&connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dto::ws::{ErrorCode, ErrorPayload},
        state::ClientConnection,
    };

    fn connect(state: &AppState, capacity: usize) -> (ConnectionId, mpsc::Receiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        state.connections().insert(id, ClientConnection { id, tx });
        (id, rx)
    }

    fn sample() -> ServerMessage {
        ServerMessage::RoomError(ErrorPayload::new(ErrorCode::Internal, "boom"))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_recipient() {
        let state = AppState::new(AppConfig::default());
        let (a, mut rx_a) = connect(&state, 4);
        let (b, mut rx_b) = connect(&state, 4);

        broadcast(&state, &[a, b], &sample());

        for rx in [&mut rx_a, &mut rx_b] {
            let Some(Message::Text(text)) = rx.recv().await else {
                panic!("expected a text frame");
            };
            assert!(text.as_str().contains("\"event\":\"room-error\""));
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let state = AppState::new(AppConfig::default());
        let (id, mut rx) = connect(&state, 1);

        send_to_connection(&state, id, &sample());
        send_to_connection(&state, id, &sample());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
        assert!(state.connections().contains_key(&id));
    }

    #[tokio::test]
    async fn closed_writer_removes_the_connection() {
        let state = AppState::new(AppConfig::default());
        let (id, rx) = connect(&state, 1);
        drop(rx);

        send_to_connection(&state, id, &sample());
        assert!(!state.connections().contains_key(&id));
    }
}
