use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::dao::models::{Difficulty, QuestionEntity};

/// Identifier of one live WebSocket connection.
pub type ConnectionId = Uuid;
/// Family group owning a room; at most one room exists per group.
pub type GroupId = String;
/// Stable player identity supplied on join.
pub type UserId = String;
/// Identifier of one run through a question list.
pub type SessionId = Uuid;

/// Question as played inside a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Question identifier.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Offered choices, in display order.
    pub choices: Vec<String>,
    /// Choice earning the points.
    pub correct_choice: String,
    /// Category label.
    pub category: String,
    /// Difficulty level.
    pub difficulty: Difficulty,
    /// Time allowed to answer.
    pub time_limit: Duration,
    /// Points for a correct answer.
    pub point_value: u32,
}

impl Question {
    /// Whether `choice` is one of the offered choices.
    pub fn offers(&self, choice: &str) -> bool {
        self.choices.iter().any(|c| c == choice)
    }

    /// Whether `choice` is the correct one.
    pub fn is_correct(&self, choice: &str) -> bool {
        self.correct_choice == choice
    }
}

impl From<QuestionEntity> for Question {
    fn from(entity: QuestionEntity) -> Self {
        Self {
            id: entity.id,
            prompt: entity.prompt,
            choices: entity.choices,
            correct_choice: entity.correct_choice,
            category: entity.category,
            difficulty: entity.difficulty,
            time_limit: Duration::from_secs(u64::from(entity.time_limit_seconds)),
            point_value: entity.point_value,
        }
    }
}

/// Identity presented by a connection asking to join a room.
#[derive(Debug, Clone)]
pub struct JoiningPlayer {
    /// Connection asking to join.
    pub connection_id: ConnectionId,
    /// Stable player identity.
    pub user_id: UserId,
    /// Name shown to the other members.
    pub display_name: String,
}

/// Member of a room.
#[derive(Debug, Clone)]
pub struct Player {
    /// Connection currently bound to the seat.
    pub connection_id: ConnectionId,
    /// Stable player identity.
    pub user_id: UserId,
    /// Name shown to the other members.
    pub display_name: String,
    /// Exactly one member of a non-empty room is host.
    pub is_host: bool,
    /// Score within the current (or last finished) session.
    pub score: u32,
    /// Reset whenever a question is delivered.
    pub has_answered_current_question: bool,
    /// First join of this seat. Rejoins keep it, and the oldest member inherits the host role.
    pub joined_at: Instant,
}

impl Player {
    pub(crate) fn new(joining: JoiningPlayer, is_host: bool, now: Instant) -> Self {
        Self {
            connection_id: joining.connection_id,
            user_id: joining.user_id,
            display_name: joining.display_name,
            is_host,
            score: 0,
            has_answered_current_question: false,
            joined_at: now,
        }
    }
}

/// One accepted answer. At most one exists per `(session, user, question)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    /// Session the answer belongs to.
    pub session_id: SessionId,
    /// Player who answered.
    pub user_id: UserId,
    /// Question answered.
    pub question_index: usize,
    /// Choice as submitted.
    pub submitted_choice: String,
    /// Whether the choice was correct.
    pub is_correct: bool,
    /// Points credited for the answer.
    pub points_awarded: u32,
    /// Time between question delivery and the answer being processed.
    pub latency: Duration,
}
