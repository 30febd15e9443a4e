//! Wire protocol of the `/ws/game` channel.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}` with camelCase payload
//! fields. Inbound frames are parsed in two steps (envelope, then the payload of the named event)
//! so that a malformed payload can be reported on the matching `*-error` event.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{Difficulty, LeaderboardDelta},
    dto::{
        common::{FinalScoreDto, PlayerSummary, QuestionView, RoomSnapshot, StandingDto},
        validation::{validate_display_name, validate_identifier},
    },
};

/// Names of the events a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// `join-room`
    JoinRoom,
    /// `leave-room`
    LeaveRoom,
    /// `start-game`
    StartGame,
    /// `submit-answer`
    SubmitAnswer,
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::StartGame => "start-game",
            Self::SubmitAnswer => "submit-answer",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "join-room" => Some(Self::JoinRoom),
            "leave-room" => Some(Self::LeaveRoom),
            "start-game" => Some(Self::StartGame),
            "submit-answer" => Some(Self::SubmitAnswer),
            _ => None,
        }
    }
}

/// Payload of `join-room`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    /// Group whose room to join.
    pub group_id: String,
    /// Stable player identity.
    pub user_id: String,
    /// Name shown to the other members.
    pub display_name: String,
}

impl Validate for JoinRoomPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_identifier(&self.group_id) {
            errors.add("groupId", e);
        }
        if let Err(e) = validate_identifier(&self.user_id) {
            errors.add("userId", e);
        }
        if let Err(e) = validate_display_name(&self.display_name) {
            errors.add("displayName", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload of `leave-room`. The room is implied by the connection.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomPayload {
    /// Checked against the bound room when given.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub group_id: Option<String>,
}

/// Payload of `start-game`: the group plus the question set parameters.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartGamePayload {
    /// Group whose room to start.
    #[validate(length(min = 1, max = 128))]
    pub group_id: String,
    /// Restrict questions to this category.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub category: Option<String>,
    /// Restrict questions to this difficulty.
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    /// Number of questions; the configured default applies when omitted.
    #[serde(default)]
    #[validate(range(min = 1, max = 50))]
    pub count: Option<usize>,
}

/// Payload of `submit-answer`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    /// Group whose room the answer is for.
    #[validate(length(min = 1, max = 128))]
    pub group_id: String,
    /// Question being answered.
    pub question_index: usize,
    /// One of the offered choices.
    #[validate(length(min = 1, max = 256))]
    pub choice: String,
    /// Client clock in milliseconds since the epoch.
    ///
    /// Accepted for compatibility and otherwise ignored: answer latency is measured on the server
    /// clock from question delivery, and scoring never looks at it.
    #[serde(default)]
    pub client_timestamp: Option<u64>,
}

/// Closed set of messages accepted from game clients.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Join or rejoin the room of a group.
    JoinRoom(JoinRoomPayload),
    /// Leave the current room.
    LeaveRoom(LeaveRoomPayload),
    /// Start a session (host only).
    StartGame(StartGamePayload),
    /// Answer the open question.
    SubmitAnswer(SubmitAnswerPayload),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parse and validate one text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|err| ProtocolError::MalformedFrame(err.to_string()))?;
        let event = ClientEvent::from_name(&envelope.event)
            .ok_or_else(|| ProtocolError::UnknownEvent(envelope.event.clone()))?;
        let data = match envelope.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let message = match event {
            ClientEvent::JoinRoom => Self::JoinRoom(parse_payload(event, data)?),
            ClientEvent::LeaveRoom => Self::LeaveRoom(parse_payload(event, data)?),
            ClientEvent::StartGame => Self::StartGame(parse_payload(event, data)?),
            ClientEvent::SubmitAnswer => Self::SubmitAnswer(parse_payload(event, data)?),
        };
        Ok(message)
    }

    /// Event this message was received as.
    pub fn event(&self) -> ClientEvent {
        match self {
            Self::JoinRoom(_) => ClientEvent::JoinRoom,
            Self::LeaveRoom(_) => ClientEvent::LeaveRoom,
            Self::StartGame(_) => ClientEvent::StartGame,
            Self::SubmitAnswer(_) => ClientEvent::SubmitAnswer,
        }
    }
}

fn parse_payload<T>(event: ClientEvent, data: Value) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = serde_json::from_value(data).map_err(|err| ProtocolError::InvalidPayload {
        event,
        message: err.to_string(),
    })?;
    payload
        .validate()
        .map_err(|err| ProtocolError::InvalidPayload {
            event,
            message: err.to_string(),
        })?;
    Ok(payload)
}

/// Failure to turn a text frame into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The envelope names no known event.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// The payload failed to decode or validate.
    #[error("invalid `{}` payload: {message}", .event.as_str())]
    InvalidPayload {
        /// Event the payload was sent with.
        event: ClientEvent,
        /// Decoding or validation failure.
        message: String,
    },
}

impl ProtocolError {
    /// Build the error event sent back to the offending connection.
    pub fn to_server_message(&self) -> ServerMessage {
        match self {
            Self::MalformedFrame(_) => {
                ServerMessage::ProtocolError(ErrorPayload::new(ErrorCode::InvalidPayload, self))
            }
            Self::UnknownEvent(_) => {
                ServerMessage::ProtocolError(ErrorPayload::new(ErrorCode::UnknownEvent, self))
            }
            Self::InvalidPayload { event, .. } => {
                ServerMessage::error_for(*event, ErrorPayload::new(ErrorCode::InvalidPayload, self))
            }
        }
    }
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The payload failed to decode or validate.
    InvalidPayload,
    /// The event name is unknown.
    UnknownEvent,
    /// The user is not on the group's roster.
    NotAMember,
    /// The connection holds no seat in the addressed room.
    NotInRoom,
    /// Only the host may start a session.
    NotHost,
    /// The room is full.
    RoomCapacityExceeded,
    /// Too few players to start.
    NotEnoughPlayers,
    /// A session is already running.
    GameAlreadyActive,
    /// Another start is being prepared.
    StartPending,
    /// The answer names a question other than the open one.
    StaleQuestion,
    /// No question is open.
    NoActiveQuestion,
    /// The choice is not offered.
    InvalidChoice,
    /// A backing service is unavailable.
    ServiceUnavailable,
    /// The room failed and was closed.
    RoomFailure,
    /// Unexpected server error.
    Internal,
}

/// Body of every `*-error` event.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human readable detail.
    pub message: String,
}

impl ErrorPayload {
    /// Payload with `code` and the rendered `message`.
    pub fn new(code: ErrorCode, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// Sent to the joining connection.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedEvent {
    /// Identity the seat belongs to.
    pub user_id: String,
    /// Whether this connection now holds the host role.
    pub is_host: bool,
    /// True when the user already had a seat and this connection took it over.
    pub rejoined: bool,
    /// Room state at join time.
    pub room: RoomSnapshot,
}

/// Sent to the other members when someone joins.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedEvent {
    /// The member who joined.
    pub player: PlayerSummary,
    /// Whether the member already had a seat.
    pub rejoined: bool,
    /// Members seated after the join.
    pub player_count: usize,
}

/// Sent to the remaining members when someone leaves or disconnects.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftEvent {
    /// Member who left.
    pub user_id: String,
    /// Name of the member who left.
    pub display_name: String,
    /// Members still seated.
    pub player_count: usize,
}

/// Broadcast after host migration.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostChangedEvent {
    /// New host.
    pub user_id: String,
    /// Name of the new host.
    pub display_name: String,
}

/// Broadcast when the host starts a session.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedEvent {
    /// Session identifier.
    pub session_id: Uuid,
    /// Number of questions in the session.
    pub question_count: usize,
    /// Members taking part, scores reset.
    pub players: Vec<PlayerSummary>,
}

/// A question opened. Carries no correct choice.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDeliveredEvent {
    /// Session the question belongs to.
    pub session_id: Uuid,
    /// Index of the question within the session.
    pub question_index: usize,
    /// Number of questions in the session.
    pub question_count: usize,
    /// Question as shown to players.
    pub question: QuestionView,
    /// RFC 3339 wall-clock deadline.
    pub deadline: String,
    /// Milliseconds left before the question closes.
    pub remaining_ms: u64,
}

/// Private acknowledgement of `submit-answer`.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmittedEvent {
    /// Question acknowledged.
    pub question_index: usize,
    /// False when an answer was already recorded; nothing was scored again.
    pub accepted: bool,
    /// Whether the recorded answer is correct.
    pub is_correct: bool,
    /// Points credited by this submission.
    pub points_awarded: u32,
    /// Session score after this submission.
    pub total_score: u32,
}

/// Broadcast after every accepted answer.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoresUpdatedEvent {
    /// Open question.
    pub question_index: usize,
    /// Members who have answered it.
    pub answered: usize,
    /// Members with their scores.
    pub players: Vec<PlayerSummary>,
}

/// Why a question closed.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceReason {
    /// Every seated member answered.
    AllAnswered,
    /// The question deadline passed.
    DeadlineElapsed,
}

/// Broadcast when a question closes.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEndedEvent {
    /// Question that closed.
    pub question_index: usize,
    /// Correct choice, revealed now.
    pub correct_choice: String,
    /// Why the question closed.
    pub reason: AdvanceReason,
}

/// Session results. The persisted standings follow in `leaderboard-updated`.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedEvent {
    /// Session that ended.
    pub session_id: Uuid,
    /// Scores, highest first.
    pub final_scores: Vec<FinalScoreDto>,
    /// Users sharing the top score.
    pub winners: Vec<String>,
    /// Delta handed to the leaderboard.
    pub leaderboard_delta: LeaderboardDelta,
}

/// Broadcast once a finished session is folded into the persistent standings.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdatedEvent {
    /// Group the standings belong to.
    pub group_id: String,
    /// Session just applied.
    pub session_id: Uuid,
    /// Ranked standings, best first.
    pub standings: Vec<StandingDto>,
}

/// Closed set of events sent to game clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// `room-joined`
    RoomJoined(RoomJoinedEvent),
    /// `player-joined`
    PlayerJoined(PlayerJoinedEvent),
    /// `player-left`
    PlayerLeft(PlayerLeftEvent),
    /// `host-changed`
    HostChanged(HostChangedEvent),
    /// `game-started`
    GameStarted(GameStartedEvent),
    /// `question-delivered`
    QuestionDelivered(QuestionDeliveredEvent),
    /// `answer-submitted`
    AnswerSubmitted(AnswerSubmittedEvent),
    /// `scores-updated`
    ScoresUpdated(ScoresUpdatedEvent),
    /// `question-ended`
    QuestionEnded(QuestionEndedEvent),
    /// `game-ended`
    GameEnded(GameEndedEvent),
    /// `leaderboard-updated`
    LeaderboardUpdated(LeaderboardUpdatedEvent),
    /// `join-room-error`
    JoinRoomError(ErrorPayload),
    /// `leave-room-error`
    LeaveRoomError(ErrorPayload),
    /// `start-game-error`
    StartGameError(ErrorPayload),
    /// `submit-answer-error`
    SubmitAnswerError(ErrorPayload),
    /// `room-error`, sent when the room fails outside a client request.
    RoomError(ErrorPayload),
    /// `protocol-error`, for frames that name no usable event.
    ProtocolError(ErrorPayload),
}

impl ServerMessage {
    /// Error event answering a failed `event`.
    pub fn error_for(event: ClientEvent, payload: ErrorPayload) -> Self {
        match event {
            ClientEvent::JoinRoom => Self::JoinRoomError(payload),
            ClientEvent::LeaveRoom => Self::LeaveRoomError(payload),
            ClientEvent::StartGame => Self::StartGameError(payload),
            ClientEvent::SubmitAnswer => Self::SubmitAnswerError(payload),
        }
    }

    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoomJoined(_) => "room-joined",
            Self::PlayerJoined(_) => "player-joined",
            Self::PlayerLeft(_) => "player-left",
            Self::HostChanged(_) => "host-changed",
            Self::GameStarted(_) => "game-started",
            Self::QuestionDelivered(_) => "question-delivered",
            Self::AnswerSubmitted(_) => "answer-submitted",
            Self::ScoresUpdated(_) => "scores-updated",
            Self::QuestionEnded(_) => "question-ended",
            Self::GameEnded(_) => "game-ended",
            Self::LeaderboardUpdated(_) => "leaderboard-updated",
            Self::JoinRoomError(_) => "join-room-error",
            Self::LeaveRoomError(_) => "leave-room-error",
            Self::StartGameError(_) => "start-game-error",
            Self::SubmitAnswerError(_) => "submit-answer-error",
            Self::RoomError(_) => "room-error",
            Self::ProtocolError(_) => "protocol-error",
        }
    }

    /// Serialize into a JSON text frame body.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
