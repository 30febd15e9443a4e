use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness along with room counters, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.leaderboard_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "leaderboard store health check failed");
            }
        }
        None => warn!("leaderboard store unavailable (degraded mode)"),
    }

    let rooms = state.registry().room_count();
    let seated = state.registry().connection_count();
    if state.is_degraded() {
        HealthResponse::degraded(rooms, seated)
    } else {
        HealthResponse::ok(rooms, seated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::leaderboard::InMemoryLeaderboardStore,
        state::{AppState, StorageBackend},
    };

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .install_storage(StorageBackend {
                leaderboard: Arc::new(InMemoryLeaderboardStore::new()),
                questions: None,
                membership: None,
            })
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.rooms, 0);
    }
}
