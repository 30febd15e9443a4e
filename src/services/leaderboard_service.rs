//! Session finalizer: applies leaderboard deltas in order, retrying until the store accepts them.

use std::collections::VecDeque;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{leaderboard::ApplyOutcome, models::LeaderboardDelta},
    dto::{
        common::StandingDto,
        ws::{LeaderboardUpdatedEvent, ServerMessage},
    },
    error::ServiceError,
    services::room_events,
    state::{AppState, SharedState},
};

/// Hand a finished session's delta to the finalizer. Never blocks the room.
pub fn enqueue(state: &AppState, delta: LeaderboardDelta) {
    debug!(
        group_id = %delta.group_id,
        session_id = %delta.session_id,
        entries = delta.entries.len(),
        "queueing leaderboard delta"
    );
    if let Err(err) = state.finalizer().send(delta) {
        warn!(
            group_id = %err.0.group_id,
            session_id = %err.0.session_id,
            "finalizer queue closed; leaderboard delta dropped"
        );
    }
}

/// Drain the finalizer queue for the lifetime of the process.
///
/// Deltas are applied one at a time in arrival order. A failed delta stays at the head of the
/// queue and is retried with exponential backoff; store idempotency makes a retry after an
/// ambiguous failure harmless.
pub async fn run_finalizer(state: SharedState) {
    let Some(mut queue) = state.take_finalizer_queue().await else {
        warn!("leaderboard finalizer already running");
        return;
    };
    let retry = state.config().leaderboard;
    let mut pending: VecDeque<LeaderboardDelta> = VecDeque::new();
    let mut delay = retry.retry_initial;

    loop {
        if pending.is_empty() {
            match queue.recv().await {
                Some(delta) => pending.push_back(delta),
                None => break,
            }
        }
        while let Ok(delta) = queue.try_recv() {
            pending.push_back(delta);
        }
        let Some(delta) = pending.front().cloned() else {
            continue;
        };

        match apply(&state, delta.clone()).await {
            Ok(outcome) => {
                pending.pop_front();
                delay = retry.retry_initial;
                if outcome.already_applied {
                    info!(
                        group_id = %delta.group_id,
                        session_id = %delta.session_id,
                        "leaderboard delta was already applied"
                    );
                } else {
                    info!(
                        group_id = %delta.group_id,
                        session_id = %delta.session_id,
                        "leaderboard updated"
                    );
                }
                publish_standings(&state, &delta, outcome).await;
            }
            Err(err) => {
                warn!(
                    group_id = %delta.group_id,
                    session_id = %delta.session_id,
                    error = %err,
                    queued = pending.len(),
                    retry_in_ms = delay.as_millis() as u64,
                    "failed to apply leaderboard delta"
                );
                sleep(delay).await;
                delay = (delay * 2).min(retry.retry_max);
            }
        }
    }

    info!("leaderboard finalizer stopped");
}

async fn apply(state: &AppState, delta: LeaderboardDelta) -> Result<ApplyOutcome, ServiceError> {
    let store = state
        .leaderboard_store()
        .await
        .ok_or(ServiceError::Degraded)?;
    Ok(store.apply_delta(delta).await?)
}

/// Tell the members of the group's live room about the new standings.
async fn publish_standings(state: &AppState, delta: &LeaderboardDelta, outcome: ApplyOutcome) {
    let Some(handle) = state.registry().room(&delta.group_id) else {
        return;
    };
    let slot = handle.lock().await;
    if slot.room.is_closed() {
        return;
    }
    room_events::broadcast(
        state,
        &slot.room.connection_ids(),
        &ServerMessage::LeaderboardUpdated(LeaderboardUpdatedEvent {
            group_id: delta.group_id.clone(),
            session_id: delta.session_id,
            standings: StandingDto::ranked(outcome.standings),
        }),
    );
}

/// Standings of a group for the read-only HTTP surface.
pub async fn standings(
    state: &AppState,
    group_id: &str,
    limit: usize,
) -> Result<Vec<StandingDto>, ServiceError> {
    let store = state
        .leaderboard_store()
        .await
        .ok_or(ServiceError::Degraded)?;
    let standings = store.standings(group_id.to_string(), limit).await?;
    Ok(StandingDto::ranked(standings))
}
