//! Scoring rules and end-of-session finalization.

use crate::{
    dao::models::{LeaderboardDelta, LeaderboardDeltaEntry},
    state::game::{Player, Question, SessionId, UserId},
};

/// Outcome of scoring one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredAnswer {
    /// Whether the choice was the correct one.
    pub is_correct: bool,
    /// Points credited.
    pub points_awarded: u32,
}

/// A correct choice earns the question's point value, anything else earns nothing.
///
/// Answer latency does not influence the award.
pub fn score_answer(question: &Question, choice: &str) -> ScoredAnswer {
    let is_correct = question.is_correct(choice);
    ScoredAnswer {
        is_correct,
        points_awarded: if is_correct { question.point_value } else { 0 },
    }
}

/// Final score of one player once a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalScore {
    /// Stable player identity.
    pub user_id: UserId,
    /// Display name at the end of the session.
    pub display_name: String,
    /// Points earned during the session.
    pub score: u32,
    /// True for every player sharing the top score.
    pub won_session: bool,
}

/// Everything produced by closing a session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Ordered by score (highest first), then by join order.
    pub final_scores: Vec<FinalScore>,
    /// Delta handed to the leaderboard finalizer.
    pub delta: LeaderboardDelta,
}

impl SessionResult {
    /// Users sharing the top score.
    pub fn winners(&self) -> Vec<UserId> {
        self.final_scores
            .iter()
            .filter(|score| score.won_session)
            .map(|score| score.user_id.clone())
            .collect()
    }
}

/// Compute final scores and the leaderboard delta for the players present at the end.
///
/// `players` must be given in join order. Every player holding the highest score wins, a tie at
/// zero included.
pub fn finalize_session<'a, I>(group_id: &str, session_id: SessionId, players: I) -> SessionResult
where
    I: IntoIterator<Item = &'a Player>,
{
    let players: Vec<&Player> = players.into_iter().collect();
    let top = players.iter().map(|p| p.score).max();

    let mut final_scores: Vec<FinalScore> = players
        .iter()
        .map(|player| FinalScore {
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            score: player.score,
            won_session: Some(player.score) == top,
        })
        .collect();
    // stable: equal scores keep join order
    final_scores.sort_by(|a, b| b.score.cmp(&a.score));

    let delta = LeaderboardDelta {
        group_id: group_id.to_string(),
        session_id,
        entries: final_scores
            .iter()
            .map(|score| LeaderboardDeltaEntry {
                user_id: score.user_id.clone(),
                display_name: score.display_name.clone(),
                score_delta: score.score,
                won_session: score.won_session,
            })
            .collect(),
    };

    SessionResult {
        final_scores,
        delta,
    }
}
