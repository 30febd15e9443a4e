//! Client operations on rooms: join, leave, start and answer, plus question deadlines.
//!
//! Every operation locks the room it targets, runs the synchronous room logic and dispatches the
//! produced effects before releasing the lock. The only await performed with a room unlocked is
//! the question fetch of `start-game`, which is bracketed by a start plan.

use std::sync::Weak;

use futures::future::BoxFuture;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    dao::questions::QuestionRequest,
    dto::ws::{
        ClientMessage, ErrorCode, ErrorPayload, JoinRoomPayload, LeaveRoomPayload, ServerMessage,
        StartGamePayload, SubmitAnswerPayload,
    },
    error::ServiceError,
    services::{question_service, room_events},
    state::{
        SharedState,
        game::{ConnectionId, JoiningPlayer, Question},
        registry::{RoomHandle, RoomPanicked, RoomSlot},
        room::Room,
        timer::DeadlineKey,
    },
};

/// Route a parsed client message and report failures back to the sender.
pub async fn handle_client_message(
    state: &SharedState,
    connection_id: ConnectionId,
    message: ClientMessage,
) {
    let event = message.event();
    let result = match message {
        ClientMessage::JoinRoom(payload) => join_room(state, connection_id, payload).await,
        ClientMessage::LeaveRoom(payload) => leave_room(state, connection_id, payload).await,
        ClientMessage::StartGame(payload) => start_game(state, connection_id, payload).await,
        ClientMessage::SubmitAnswer(payload) => submit_answer(state, connection_id, payload).await,
    };

    match result {
        Ok(()) => {}
        // Members were already told with a `room-error`.
        Err(ServiceError::RoomFailure(_)) => {}
        Err(err) => {
            debug!(%connection_id, event = event.as_str(), error = %err, "client operation rejected");
            room_events::send_to_connection(
                state,
                connection_id,
                &ServerMessage::error_for(event, err.to_payload()),
            );
        }
    }
}

/// Seat the connection in the room of the requested group, creating the room if needed.
pub async fn join_room(
    state: &SharedState,
    connection_id: ConnectionId,
    payload: JoinRoomPayload,
) -> Result<(), ServiceError> {
    let JoinRoomPayload {
        group_id,
        user_id,
        display_name,
    } = payload;

    let directory = state.membership().await;
    match directory
        .is_member(group_id.clone(), user_id.clone())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(%group_id, %user_id, "join refused: not a member");
            return Err(ServiceError::NotAMember { group_id, user_id });
        }
        Err(err) => {
            warn!(%group_id, error = %err, "membership directory unavailable");
            return Err(ServiceError::Unavailable(err));
        }
    }

    // A connection plays in at most one room under one identity.
    if let Some(bound) = state.registry().group_of(connection_id) {
        let same_seat = bound == group_id
            && match state.registry().lock_bound(connection_id).await {
                Some((_, _, slot)) => slot
                    .room
                    .player_by_connection(connection_id)
                    .is_some_and(|player| player.user_id == user_id),
                None => false,
            };
        if !same_seat {
            remove_connection(state, connection_id).await;
        }
    }

    let (handle, mut slot) = state.registry().resolve_or_create_room(&group_id).await;
    let joining = JoiningPlayer {
        connection_id,
        user_id,
        display_name,
    };
    let now = Instant::now();

    let outcome = match run_guarded(state, &group_id, &handle, &mut slot, |room| {
        room.join(joining, now)
    })? {
        Ok(outcome) => outcome,
        Err(err) => {
            if slot.room.is_empty() {
                slot.room.close();
                state.registry().discard(&group_id, &handle);
            }
            return Err(err.into());
        }
    };

    state.registry().bind(connection_id, &group_id);
    if let Some(previous) = outcome.replaced_connection {
        if previous != connection_id {
            state.registry().unbind(previous, &group_id);
            debug!(%group_id, %previous, %connection_id, "seat taken over by a new connection");
        }
    }
    room_events::dispatch(state, &handle, &mut slot, outcome.effects);
    Ok(())
}

/// Explicit `leave-room`.
pub async fn leave_room(
    state: &SharedState,
    connection_id: ConnectionId,
    payload: LeaveRoomPayload,
) -> Result<(), ServiceError> {
    let bound = state.registry().group_of(connection_id);
    if let Some(requested) = payload.group_id {
        if bound.as_deref() != Some(requested.as_str()) {
            return Err(ServiceError::NotInRoom(requested));
        }
    }
    if remove_connection(state, connection_id).await {
        Ok(())
    } else {
        Err(ServiceError::NotInRoom(bound.unwrap_or_default()))
    }
}

/// Remove the connection from whatever room it is seated in.
///
/// Used for explicit leaves and for disconnects. Returns whether a seat was released.
pub async fn remove_connection(state: &SharedState, connection_id: ConnectionId) -> bool {
    let Some((group_id, handle, mut slot)) =
        state.registry().detach_connection(connection_id).await
    else {
        return false;
    };
    let now = Instant::now();

    match run_guarded(state, &group_id, &handle, &mut slot, |room| {
        room.leave(connection_id, now)
    }) {
        Ok(Ok(outcome)) => {
            let emptied = outcome.emptied;
            room_events::dispatch(state, &handle, &mut slot, outcome.effects);
            if emptied {
                slot.timer.cancel();
                state.registry().discard(&group_id, &handle);
            }
            true
        }
        Ok(Err(err)) => {
            debug!(%group_id, %connection_id, error = %err, "connection held no seat");
            false
        }
        Err(_) => true,
    }
}

/// Start a session on behalf of the host.
pub async fn start_game(
    state: &SharedState,
    connection_id: ConnectionId,
    payload: StartGamePayload,
) -> Result<(), ServiceError> {
    let (group_id, handle, mut slot) = state
        .registry()
        .lock_bound(connection_id)
        .await
        .ok_or_else(|| ServiceError::NotInRoom(payload.group_id.clone()))?;
    if group_id != payload.group_id {
        return Err(ServiceError::NotInRoom(payload.group_id));
    }

    let plan_id = run_guarded(state, &group_id, &handle, &mut slot, |room| {
        room.plan_start(connection_id)
    })??;
    drop(slot);

    let request = QuestionRequest {
        category: payload.category,
        difficulty: payload.difficulty,
        count: state.config().session.question_count(payload.count),
    };
    let questions: Vec<Question> = question_service::session_questions(state, &group_id, request)
        .await
        .into_iter()
        .map(Question::from)
        .collect();

    let mut slot = handle.lock().await;
    if slot.room.is_closed() {
        debug!(%group_id, "room closed while questions were fetched");
        return Ok(());
    }
    let now = Instant::now();
    let effects = run_guarded(state, &group_id, &handle, &mut slot, |room| {
        room.begin_session(plan_id, questions, now)
    })??;
    room_events::dispatch(state, &handle, &mut slot, effects);
    Ok(())
}

/// Record an answer for the open question.
pub async fn submit_answer(
    state: &SharedState,
    connection_id: ConnectionId,
    payload: SubmitAnswerPayload,
) -> Result<(), ServiceError> {
    let (group_id, handle, mut slot) = state
        .registry()
        .lock_bound(connection_id)
        .await
        .ok_or_else(|| ServiceError::NotInRoom(payload.group_id.clone()))?;
    if group_id != payload.group_id {
        return Err(ServiceError::NotInRoom(payload.group_id));
    }

    let now = Instant::now();
    let effects = run_guarded(state, &group_id, &handle, &mut slot, |room| {
        room.submit_answer(connection_id, payload.question_index, &payload.choice, now)
    })??;
    room_events::dispatch(state, &handle, &mut slot, effects);
    Ok(())
}

/// Callback armed on the question timer.
///
/// Holds only a weak reference so a destroyed room is not kept alive by its timer.
pub fn deadline_elapsed(
    state: SharedState,
    room: Weak<Mutex<RoomSlot>>,
    key: DeadlineKey,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(handle) = room.upgrade() else {
            return;
        };
        let mut slot = handle.lock().await;
        if !slot.timer.disarm(key) {
            debug!(?key, "deadline superseded before it could run");
            return;
        }
        let group_id = slot.room.group_id().to_string();
        let now = Instant::now();
        if let Ok(effects) = run_guarded(&state, &group_id, &handle, &mut slot, |room| {
            room.deadline_elapsed(key, now)
        }) {
            room_events::dispatch(&state, &handle, &mut slot, effects);
        }
    })
}

/// Run a room operation; a panic tears the room down and is reported to its members.
fn run_guarded<T>(
    state: &SharedState,
    group_id: &str,
    handle: &RoomHandle,
    slot: &mut RoomSlot,
    op: impl FnOnce(&mut Room) -> T,
) -> Result<T, RoomPanicked> {
    slot.run(op).inspect_err(|panicked| {
        error!(%group_id, error = %panicked, "room operation panicked; closing room");
        teardown_room(state, group_id, handle, slot);
    })
}

fn teardown_room(state: &SharedState, group_id: &str, handle: &RoomHandle, slot: &mut RoomSlot) {
    slot.timer.cancel();
    let members = slot.room.teardown();
    for connection_id in &members {
        state.registry().unbind(*connection_id, group_id);
    }
    state.registry().discard(group_id, handle);
    room_events::broadcast(
        state,
        &members,
        &ServerMessage::RoomError(ErrorPayload::new(
            ErrorCode::RoomFailure,
            "the room failed and was closed; join again to continue",
        )),
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, ClientConnection, room::RoomError},
    };

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<Message>,
    }

    impl Client {
        fn connect(state: &SharedState) -> Self {
            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::channel(64);
            state.connections().insert(id, ClientConnection { id, tx });
            Self { id, rx }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let Message::Text(text) = message {
                    frames.push(serde_json::from_str(text.as_str()).unwrap());
                }
            }
            frames
        }

        fn events(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .map(|frame| frame["event"].as_str().unwrap().to_string())
                .collect()
        }
    }

    fn join_payload(group: &str, user: &str) -> JoinRoomPayload {
        JoinRoomPayload {
            group_id: group.into(),
            user_id: user.into(),
            display_name: user.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn join_binds_and_announces() {
        let state = AppState::new(AppConfig::default());
        let mut ann = Client::connect(&state);
        let mut bob = Client::connect(&state);

        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();
        join_room(&state, bob.id, join_payload("smiths", "bob")).await.unwrap();

        assert_eq!(state.registry().group_of(bob.id).as_deref(), Some("smiths"));
        assert_eq!(ann.events(), ["room-joined", "player-joined"]);
        let frames = bob.drain();
        assert_eq!(frames[0]["event"], "room-joined");
        assert_eq!(frames[0]["data"]["isHost"], false);
    }

    #[tokio::test]
    async fn roster_rejects_strangers() {
        let mut config = AppConfig::default();
        config.membership.insert("smiths".into(), vec!["ann".into()]);
        let state = AppState::new(config);
        let mut eve = Client::connect(&state);

        handle_client_message(
            &state,
            eve.id,
            ClientMessage::JoinRoom(join_payload("smiths", "eve")),
        )
        .await;

        let frames = eve.drain();
        assert_eq!(frames[0]["event"], "join-room-error");
        assert_eq!(frames[0]["data"]["code"], "not_a_member");
        assert_eq!(state.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn switching_groups_leaves_the_previous_room() {
        let state = AppState::new(AppConfig::default());
        let ann = Client::connect(&state);

        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();
        join_room(&state, ann.id, join_payload("jones", "ann")).await.unwrap();

        assert!(state.registry().room("smiths").is_none());
        assert_eq!(state.registry().group_of(ann.id).as_deref(), Some("jones"));
    }

    #[tokio::test]
    async fn last_leave_destroys_the_room() {
        let state = AppState::new(AppConfig::default());
        let ann = Client::connect(&state);
        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();

        leave_room(&state, ann.id, LeaveRoomPayload::default()).await.unwrap();
        assert_eq!(state.registry().room_count(), 0);
        assert!(matches!(
            leave_room(&state, ann.id, LeaveRoomPayload::default()).await,
            Err(ServiceError::NotInRoom(_))
        ));
    }

    #[tokio::test]
    async fn only_the_host_can_start() {
        let state = AppState::new(AppConfig::default());
        let ann = Client::connect(&state);
        let bob = Client::connect(&state);
        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();
        join_room(&state, bob.id, join_payload("smiths", "bob")).await.unwrap();

        let err = start_game(
            &state,
            bob.id,
            StartGamePayload {
                group_id: "smiths".into(),
                category: None,
                difficulty: None,
                count: Some(1),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Room(RoomError::NotHost)));
    }

    #[tokio::test]
    async fn answers_must_target_the_bound_room() {
        let state = AppState::new(AppConfig::default());
        let ann = Client::connect(&state);
        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();

        let err = submit_answer(
            &state,
            ann.id,
            SubmitAnswerPayload {
                group_id: "jones".into(),
                question_index: 0,
                choice: "x".into(),
                client_timestamp: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotInRoom(group) if group == "jones"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_advances_the_session() {
        let state = AppState::new(AppConfig::default());
        let mut ann = Client::connect(&state);
        join_room(&state, ann.id, join_payload("smiths", "ann")).await.unwrap();
        start_game(
            &state,
            ann.id,
            StartGamePayload {
                group_id: "smiths".into(),
                category: None,
                difficulty: None,
                count: Some(2),
            },
        )
        .await
        .unwrap();

        let frames = ann.drain();
        let delivered = frames
            .iter()
            .find(|f| f["event"] == "question-delivered")
            .unwrap();
        assert_eq!(delivered["data"]["questionIndex"], 0);
        let remaining = delivered["data"]["remainingMs"].as_u64().unwrap();

        tokio::time::sleep(Duration::from_millis(remaining + 10)).await;

        let events = ann.events();
        assert_eq!(events, ["question-ended", "question-delivered"]);
    }
}
