use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Difficulty tier attached to a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Warm-up questions.
    Easy,
    /// Default tier.
    Medium,
    /// Questions for seasoned players.
    Hard,
}

/// Question as handed over by a question supply backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEntity {
    /// Stable identifier of the question in its backend.
    pub id: String,
    /// Text shown to players.
    pub prompt: String,
    /// Ordered answer choices.
    pub choices: Vec<String>,
    /// The choice that scores; always one of `choices`.
    pub correct_choice: String,
    /// Free-form category label (e.g. "history").
    pub category: String,
    /// Difficulty tier.
    pub difficulty: Difficulty,
    /// Seconds players get to answer.
    pub time_limit_seconds: u32,
    /// Points awarded for a correct answer.
    pub point_value: u32,
}

impl QuestionEntity {
    /// Whether the entity is usable in a session: at least two choices, the correct one among them,
    /// and a positive time limit.
    pub fn is_playable(&self) -> bool {
        self.choices.len() >= 2
            && self.choices.iter().any(|choice| choice == &self.correct_choice)
            && self.time_limit_seconds > 0
    }
}

/// Session-scoped change handed to the leaderboard store once a session ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardDelta {
    /// Group owning the room the session ran in.
    pub group_id: String,
    /// Session identifier; `(group_id, session_id)` is the idempotency key.
    pub session_id: Uuid,
    /// One entry per player present when the session finished.
    pub entries: Vec<LeaderboardDeltaEntry>,
}

/// Per-player part of a [`LeaderboardDelta`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardDeltaEntry {
    /// Stable player identity.
    pub user_id: String,
    /// Display name at the time the session ended.
    pub display_name: String,
    /// Points accumulated during the session.
    pub score_delta: u32,
    /// Whether the player shares the top score of the session.
    pub won_session: bool,
}

/// Persistent standing of one player inside a group leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StandingEntity {
    /// Stable player identity.
    pub user_id: String,
    /// Latest known display name.
    pub display_name: String,
    /// Sum of all session scores.
    pub total_score: u64,
    /// Number of finished sessions the player took part in.
    pub sessions_played: u32,
    /// Number of sessions won (ties included).
    pub wins: u32,
    /// Consecutive sessions won, reset by a session without a win.
    pub current_streak: u32,
    /// Longest winning streak observed.
    pub best_streak: u32,
}

impl StandingEntity {
    /// Fold one delta entry into the standing.
    pub fn apply(&mut self, entry: &LeaderboardDeltaEntry) {
        self.display_name = entry.display_name.clone();
        self.total_score += u64::from(entry.score_delta);
        self.sessions_played += 1;
        if entry.won_session {
            self.wins += 1;
            self.current_streak += 1;
            self.best_streak = self.best_streak.max(self.current_streak);
        } else {
            self.current_streak = 0;
        }
    }
}

/// Order standings the way leaderboards display them: total score, then wins, then name.
pub fn sort_standings(standings: &mut [StandingEntity]) {
    standings.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then(b.wins.cmp(&a.wins))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(won: bool, score: u32) -> LeaderboardDeltaEntry {
        LeaderboardDeltaEntry {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            score_delta: score,
            won_session: won,
        }
    }

    #[test]
    fn streak_grows_with_wins_and_resets_on_loss() {
        let mut standing = StandingEntity::default();
        standing.apply(&entry(true, 10));
        standing.apply(&entry(true, 5));
        assert_eq!(standing.current_streak, 2);
        standing.apply(&entry(false, 0));
        assert_eq!(standing.current_streak, 0);
        assert_eq!(standing.best_streak, 2);
        assert_eq!(standing.wins, 2);
        assert_eq!(standing.sessions_played, 3);
        assert_eq!(standing.total_score, 15);
    }

    #[test]
    fn unplayable_question_is_detected() {
        let question = QuestionEntity {
            id: "q".into(),
            prompt: "?".into(),
            choices: vec!["a".into(), "b".into()],
            correct_choice: "c".into(),
            category: "misc".into(),
            difficulty: Difficulty::Easy,
            time_limit_seconds: 10,
            point_value: 1,
        };
        assert!(!question.is_playable());
    }
}
