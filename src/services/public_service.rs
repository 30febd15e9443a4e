//! Service helpers that expose read-only projections of rooms and leaderboards.

use tokio::time::Instant;

use crate::{
    dto::{
        common::RoomSnapshot,
        public::{LeaderboardResponse, RoomListItem, RoomsResponse},
    },
    error::ServiceError,
    services::leaderboard_service,
    state::SharedState,
};

/// List the live rooms, sorted by group.
pub async fn list_rooms(state: &SharedState) -> RoomsResponse {
    let mut rooms = Vec::new();
    for (group_id, handle) in state.registry().rooms() {
        let slot = handle.lock().await;
        if slot.room.is_closed() {
            continue;
        }
        rooms.push(RoomListItem {
            group_id,
            phase: slot.room.phase().into(),
            player_count: slot.room.player_count(),
            host_user_id: slot.room.host().map(|host| host.user_id.clone()),
        });
    }
    rooms.sort_by(|a, b| a.group_id.cmp(&b.group_id));
    RoomsResponse { rooms }
}

/// Snapshot of one room, including the open question's remaining time.
pub async fn room_snapshot(state: &SharedState, group_id: &str) -> Result<RoomSnapshot, ServiceError> {
    let not_found = || ServiceError::NotFound(format!("no live room for group `{group_id}`"));
    let handle = state.registry().room(group_id).ok_or_else(not_found)?;
    let slot = handle.lock().await;
    if slot.room.is_closed() {
        return Err(not_found());
    }
    Ok(slot.room.snapshot(Instant::now()))
}

/// Persistent standings of a group.
pub async fn leaderboard(
    state: &SharedState,
    group_id: &str,
    limit: usize,
) -> Result<LeaderboardResponse, ServiceError> {
    let standings = leaderboard_service::standings(state, group_id, limit).await?;
    Ok(LeaderboardResponse {
        group_id: group_id.to_string(),
        standings,
    })
}
