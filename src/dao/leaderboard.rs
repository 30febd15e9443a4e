use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::{
    models::{LeaderboardDelta, StandingEntity, sort_standings},
    storage::StorageResult,
};

/// Result of applying a delta to a leaderboard store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Standings of the group after the delta, in display order.
    pub standings: Vec<StandingEntity>,
    /// True when the `(group, session)` key had already been applied and nothing changed.
    pub already_applied: bool,
}

/// Persistent leaderboard collaborator fed by the session finalizer.
pub trait LeaderboardStore: Send + Sync {
    /// Apply a session delta. Applying the same `(group_id, session_id)` twice must not double count.
    fn apply_delta(&self, delta: LeaderboardDelta) -> BoxFuture<'static, StorageResult<ApplyOutcome>>;
    /// Read the standings of a group, best first, truncated to `limit`.
    fn standings(
        &self,
        group_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingEntity>>>;
    /// Liveness check used by the supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

#[derive(Debug, Default)]
struct GroupBoard {
    standings: IndexMap<String, StandingEntity>,
    applied_sessions: HashSet<Uuid>,
}

impl GroupBoard {
    fn sorted(&self) -> Vec<StandingEntity> {
        let mut standings: Vec<_> = self.standings.values().cloned().collect();
        sort_standings(&mut standings);
        standings
    }
}

/// Process-local leaderboard used when no persistent backend is configured.
#[derive(Clone, Default)]
pub struct InMemoryLeaderboardStore {
    boards: Arc<DashMap<String, GroupBoard>>,
}

impl InMemoryLeaderboardStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_now(&self, delta: &LeaderboardDelta) -> ApplyOutcome {
        let mut board = self.boards.entry(delta.group_id.clone()).or_default();
        if !board.applied_sessions.insert(delta.session_id) {
            return ApplyOutcome {
                standings: board.sorted(),
                already_applied: true,
            };
        }

        for entry in &delta.entries {
            board
                .standings
                .entry(entry.user_id.clone())
                .or_insert_with(|| StandingEntity {
                    user_id: entry.user_id.clone(),
                    ..StandingEntity::default()
                })
                .apply(entry);
        }

        ApplyOutcome {
            standings: board.sorted(),
            already_applied: false,
        }
    }
}

impl LeaderboardStore for InMemoryLeaderboardStore {
    fn apply_delta(&self, delta: LeaderboardDelta) -> BoxFuture<'static, StorageResult<ApplyOutcome>> {
        Box::pin(future::ready(Ok(self.apply_now(&delta))))
    }

    fn standings(
        &self,
        group_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingEntity>>> {
        let standings = self
            .boards
            .get(&group_id)
            .map(|board| board.sorted())
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .collect();
        Box::pin(future::ready(Ok(standings)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::LeaderboardDeltaEntry;

    fn delta(session_id: Uuid, winner: &str) -> LeaderboardDelta {
        LeaderboardDelta {
            group_id: "family-1".into(),
            session_id,
            entries: vec![
                LeaderboardDeltaEntry {
                    user_id: "ada".into(),
                    display_name: "Ada".into(),
                    score_delta: if winner == "ada" { 30 } else { 10 },
                    won_session: winner == "ada",
                },
                LeaderboardDeltaEntry {
                    user_id: "bob".into(),
                    display_name: "Bob".into(),
                    score_delta: if winner == "bob" { 30 } else { 10 },
                    won_session: winner == "bob",
                },
            ],
        }
    }

    #[tokio::test]
    async fn applying_same_session_twice_is_idempotent() {
        let store = InMemoryLeaderboardStore::new();
        let session = Uuid::new_v4();

        let first = store.apply_delta(delta(session, "ada")).await.unwrap();
        assert!(!first.already_applied);
        let second = store.apply_delta(delta(session, "ada")).await.unwrap();
        assert!(second.already_applied);
        assert_eq!(first.standings, second.standings);
        assert_eq!(second.standings[0].total_score, 30);
    }

    #[tokio::test]
    async fn standings_are_sorted_and_limited() {
        let store = InMemoryLeaderboardStore::new();
        store.apply_delta(delta(Uuid::new_v4(), "bob")).await.unwrap();
        store.apply_delta(delta(Uuid::new_v4(), "bob")).await.unwrap();

        let top = store.standings("family-1".into(), 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].user_id, "bob");
        assert_eq!(top[0].current_streak, 2);

        let unknown = store.standings("nobody".into(), 10).await.unwrap();
        assert!(unknown.is_empty());
    }
}
