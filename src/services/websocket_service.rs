use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::ClientMessage,
    services::{room_events, room_service},
    state::{ClientConnection, SharedState},
};

/// Handle the full lifecycle of one game client connection.
///
/// Frames are processed strictly in arrival order; room operations never wait on this socket
/// because outbound frames go through a bounded queue drained by a dedicated writer task.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<Message>(state.config().connection.outbound_buffer);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    state.connections().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(%connection_id, "game client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%connection_id, payload = %text, "received client frame");
                match ClientMessage::from_json_str(&text) {
                    Ok(message) => {
                        room_service::handle_client_message(&state, connection_id, message).await;
                    }
                    Err(err) => {
                        warn!(%connection_id, error = %err, "rejected client frame");
                        room_events::send_to_connection(
                            &state,
                            connection_id,
                            &err.to_server_message(),
                        );
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.try_send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%connection_id, "game client closed");
                let _ = outbound_tx.try_send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!(%connection_id, "ignoring binary frame");
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if room_service::remove_connection(&state, connection_id).await {
        debug!(%connection_id, "seat released on disconnect");
    }
    state.connections().remove(&connection_id);
    info!(%connection_id, "game client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::Sender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
