use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Live rooms.
    pub rooms: usize,
    /// Connections currently seated in a room.
    pub seated_connections: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(rooms: usize, seated_connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            rooms,
            seated_connections,
        }
    }

    /// Create a health response indicating the leaderboard store is unavailable.
    ///
    /// Rooms keep working in this mode; only persistence is paused.
    pub fn degraded(rooms: usize, seated_connections: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            rooms,
            seated_connections,
        }
    }
}
