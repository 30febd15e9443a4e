use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::RoomPhase;

/// Room phase exposed to clients (REST/WebSocket).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleRoomPhase {
    /// Lobby, waiting for the host to start.
    Waiting,
    /// A session is running.
    Active,
    /// Results of the last session are being published.
    Finished,
}

impl From<RoomPhase> for VisibleRoomPhase {
    fn from(value: RoomPhase) -> Self {
        match value {
            RoomPhase::Waiting => VisibleRoomPhase::Waiting,
            RoomPhase::Active => VisibleRoomPhase::Active,
            RoomPhase::Finished => VisibleRoomPhase::Finished,
        }
    }
}
