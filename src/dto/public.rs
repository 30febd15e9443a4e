use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dto::{common::StandingDto, phase::VisibleRoomPhase};

/// Default number of leaderboard lines returned when `limit` is omitted.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 20;

/// One live room in the room listing.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomListItem {
    /// Group owning the room.
    pub group_id: String,
    /// Lifecycle phase.
    pub phase: VisibleRoomPhase,
    /// Members currently seated.
    pub player_count: usize,
    /// Current host.
    pub host_user_id: Option<String>,
}

/// Response listing every live room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomsResponse {
    /// Live rooms sorted by group.
    pub rooms: Vec<RoomListItem>,
}

/// Query string of the leaderboard route.
#[derive(Debug, Default, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Maximum number of lines to return (1-100).
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

impl LeaderboardQuery {
    /// Requested limit, or the default when omitted.
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
    }
}

/// Persistent standings of a group, best first.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    /// Group the standings belong to.
    pub group_id: String,
    /// Ranked standings, best first.
    pub standings: Vec<StandingDto>,
}
