use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::{
        common::RoomSnapshot,
        public::{LeaderboardQuery, LeaderboardResponse, RoomsResponse},
    },
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Read-only endpoints exposing live rooms and group leaderboards.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/{group_id}", get(get_room))
        .route("/leaderboard/{group_id}", get(get_leaderboard))
}

#[utoipa::path(
    get,
    path = "/rooms",
    tag = "public",
    responses((status = 200, description = "Live rooms", body = RoomsResponse))
)]
/// List every live room.
pub async fn list_rooms(State(state): State<SharedState>) -> Json<RoomsResponse> {
    Json(public_service::list_rooms(&state).await)
}

#[utoipa::path(
    get,
    path = "/rooms/{group_id}",
    tag = "public",
    params(("group_id" = String, Path, description = "Group owning the room")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "No live room for this group")
    )
)]
/// Return the roster and session progress of a group's room.
pub async fn get_room(
    State(state): State<SharedState>,
    Path(group_id): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let snapshot = public_service::room_snapshot(&state, &group_id).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/leaderboard/{group_id}",
    tag = "public",
    params(
        ("group_id" = String, Path, description = "Group whose standings are requested"),
        LeaderboardQuery
    ),
    responses(
        (status = 200, description = "Group standings", body = LeaderboardResponse),
        (status = 400, description = "Invalid limit"),
        (status = 503, description = "Leaderboard store unavailable")
    )
)]
/// Return the persistent standings of a group.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Path(group_id): Path<String>,
    Valid(Query(query)): Valid<Query<LeaderboardQuery>>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let payload = public_service::leaderboard(&state, &group_id, query.limit()).await?;
    Ok(Json(payload))
}
