use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{leaderboard::LeaderboardStore, storage::StorageError},
    state::{SharedState, StorageBackend},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a storage backend installed in the shared state, entering degraded mode while it is down.
///
/// Rooms never wait on this loop: they keep running on the fallback question bank, and finished
/// sessions queue up in the finalizer until a leaderboard store is back.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<StorageBackend, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(backend) => {
                let store = backend.leaderboard.clone();
                state.install_storage(backend).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch_health(&state, store.as_ref()).await;

                warn!("exhausted storage reconnect attempts; dropping leaderboard store");
                state.clear_leaderboard_store().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the store until it stays unreachable through every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn LeaderboardStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store).await {
                    return;
                }
                state.update_degraded(false);
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn LeaderboardStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        config::AppConfig, dao::leaderboard::InMemoryLeaderboardStore, state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_backend_connects() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        tokio::spawn(run(state.clone(), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StorageError::unavailable(
                        "refused".into(),
                        std::io::Error::other("connection refused"),
                    ))
                } else {
                    Ok(StorageBackend {
                        leaderboard: Arc::new(InMemoryLeaderboardStore::new()),
                        questions: None,
                        membership: None,
                    })
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(state.is_degraded());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!state.is_degraded());
        assert!(state.leaderboard_store().await.is_some());
    }
}
