use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{Difficulty, StandingEntity},
    dto::phase::VisibleRoomPhase,
    state::{
        game::{Player, Question},
        scoring::FinalScore,
    },
};

/// Public view of a room member.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    /// Stable player identity.
    pub user_id: String,
    /// Name shown to the other members.
    pub display_name: String,
    /// Whether this member may start a session.
    pub is_host: bool,
    /// Score within the current or last session.
    pub score: u32,
    /// Whether an answer to the open question was accepted.
    pub has_answered: bool,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            is_host: player.is_host,
            score: player.score,
            has_answered: player.has_answered_current_question,
        }
    }
}

/// Question as shown to players. Never carries the correct choice.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question identifier.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Offered choices, in display order.
    pub choices: Vec<String>,
    /// Category label.
    pub category: String,
    /// Difficulty level.
    pub difficulty: Difficulty,
    /// Seconds allowed to answer.
    pub time_limit_seconds: u64,
    /// Points for a correct answer.
    pub point_value: u32,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            choices: question.choices.clone(),
            category: question.category.clone(),
            difficulty: question.difficulty,
            time_limit_seconds: question.time_limit.as_secs(),
            point_value: question.point_value,
        }
    }
}

/// Final score line published when a session ends.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalScoreDto {
    /// Stable player identity.
    pub user_id: String,
    /// Name shown to the other members.
    pub display_name: String,
    /// Points earned during the session.
    pub score: u32,
    /// True for every player sharing the top score.
    pub won_session: bool,
}

impl From<&FinalScore> for FinalScoreDto {
    fn from(score: &FinalScore) -> Self {
        Self {
            user_id: score.user_id.clone(),
            display_name: score.display_name.clone(),
            score: score.score,
            won_session: score.won_session,
        }
    }
}

/// Persistent leaderboard line of a group.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StandingDto {
    /// Position in the standings, starting at 1.
    pub rank: usize,
    /// Stable player identity.
    pub user_id: String,
    /// Last display name seen for the player.
    pub display_name: String,
    /// Points accumulated over every session.
    pub total_score: u64,
    /// Sessions the player took part in.
    pub sessions_played: u32,
    /// Sessions won, ties included.
    pub wins: u32,
    /// Consecutive sessions won up to the latest one.
    pub current_streak: u32,
    /// Longest run of consecutive wins.
    pub best_streak: u32,
}

impl StandingDto {
    /// Convert sorted standings into ranked DTOs (rank starts at 1).
    pub fn ranked(standings: Vec<StandingEntity>) -> Vec<Self> {
        standings
            .into_iter()
            .enumerate()
            .map(|(index, standing)| Self {
                rank: index + 1,
                user_id: standing.user_id,
                display_name: standing.display_name,
                total_score: standing.total_score,
                sessions_played: standing.sessions_played,
                wins: standing.wins,
                current_streak: standing.current_streak,
                best_streak: standing.best_streak,
            })
            .collect()
    }
}

/// Shared snapshot describing a room and its in-flight session.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Group owning the room.
    pub group_id: String,
    /// Lifecycle phase.
    pub phase: VisibleRoomPhase,
    /// Current host, absent only while the room is being torn down.
    pub host_user_id: Option<String>,
    /// Members in join order.
    pub players: Vec<PlayerSummary>,
    /// Present while a session is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Index of the open question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question_index: Option<usize>,
    /// Number of questions in the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_count: Option<usize>,
    /// Milliseconds left on the open question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}
