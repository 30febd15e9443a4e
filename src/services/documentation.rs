use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Rooms Back.
///
/// The WebSocket event payloads are listed as schemas so client authors can generate types for
/// the frames exchanged on `/ws/game`.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::list_rooms,
        crate::routes::public::get_room,
        crate::routes::public::get_leaderboard,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::public::RoomsResponse,
            crate::dto::public::RoomListItem,
            crate::dto::public::LeaderboardResponse,
            crate::dto::common::RoomSnapshot,
            crate::dto::common::StandingDto,
            crate::dto::ws::JoinRoomPayload,
            crate::dto::ws::LeaveRoomPayload,
            crate::dto::ws::StartGamePayload,
            crate::dto::ws::SubmitAnswerPayload,
            crate::dto::ws::ErrorPayload,
            crate::dto::ws::ErrorCode,
            crate::dto::ws::RoomJoinedEvent,
            crate::dto::ws::PlayerJoinedEvent,
            crate::dto::ws::PlayerLeftEvent,
            crate::dto::ws::HostChangedEvent,
            crate::dto::ws::GameStartedEvent,
            crate::dto::ws::QuestionDeliveredEvent,
            crate::dto::ws::AnswerSubmittedEvent,
            crate::dto::ws::ScoresUpdatedEvent,
            crate::dto::ws::QuestionEndedEvent,
            crate::dto::ws::GameEndedEvent,
            crate::dto::ws::LeaderboardUpdatedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Read-only views of rooms and leaderboards"),
        (name = "game", description = "WebSocket protocol for game clients"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/healthcheck", "/rooms", "/rooms/{group_id}", "/leaderboard/{group_id}", "/ws/game"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
