/// Players, questions and answer records.
pub mod game;
pub mod registry;
pub mod room;
pub mod scoring;
/// Room lifecycle state machine.
pub mod state_machine;
/// Cancellable per-room question deadline.
pub mod timer;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::{
        leaderboard::LeaderboardStore,
        membership::{MembershipDirectory, OpenMembership, StaticMembership},
        models::LeaderboardDelta,
        questions::{FallbackQuestionBank, QuestionSupply},
    },
    state::{game::ConnectionId, registry::RoomRegistry},
};

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

#[derive(Clone)]
/// Handle used to push frames to a connected game client.
pub struct ClientConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Outbound frame queue drained by the connection writer task.
    pub tx: mpsc::Sender<Message>,
}

/// Collaborators provided by a storage backend once it is reachable.
#[derive(Clone)]
pub struct StorageBackend {
    /// Durable leaderboard storage.
    pub leaderboard: Arc<dyn LeaderboardStore>,
    /// Replaces the fallback bank as primary question source.
    pub questions: Option<Arc<dyn QuestionSupply>>,
    /// Replaces the configured directory when the configuration restricts no group.
    pub membership: Option<Arc<dyn MembershipDirectory>>,
}

/// Central application state storing rooms, live connections and collaborator handles.
pub struct AppState {
    config: AppConfig,
    registry: RoomRegistry,
    connections: DashMap<ConnectionId, ClientConnection>,
    leaderboard_store: RwLock<Option<Arc<dyn LeaderboardStore>>>,
    question_supply: RwLock<Option<Arc<dyn QuestionSupply>>>,
    membership: RwLock<Arc<dyn MembershipDirectory>>,
    roster_configured: bool,
    fallback_questions: FallbackQuestionBank,
    degraded: watch::Sender<bool>,
    finalizer_tx: mpsc::UnboundedSender<LeaderboardDelta>,
    finalizer_rx: Mutex<Option<mpsc::UnboundedReceiver<LeaderboardDelta>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a leaderboard store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (finalizer_tx, finalizer_rx) = mpsc::unbounded_channel();

        let roster_configured = !config.membership.is_empty();
        let membership: Arc<dyn MembershipDirectory> = if roster_configured {
            Arc::new(StaticMembership::new(config.membership.clone()))
        } else {
            Arc::new(OpenMembership)
        };

        Arc::new(Self {
            registry: RoomRegistry::new(config.room.policy()),
            connections: DashMap::new(),
            leaderboard_store: RwLock::new(None),
            question_supply: RwLock::new(None),
            membership: RwLock::new(membership),
            roster_configured,
            fallback_questions: FallbackQuestionBank::new(config.fallback_questions.clone()),
            degraded: degraded_tx,
            finalizer_tx,
            finalizer_rx: Mutex::new(Some(finalizer_rx)),
            config,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Live rooms and the connection index.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Outbound handles of every open game connection.
    pub fn connections(&self) -> &DashMap<ConnectionId, ClientConnection> {
        &self.connections
    }

    /// Obtain a handle to the current leaderboard store, if one is installed.
    pub async fn leaderboard_store(&self) -> Option<Arc<dyn LeaderboardStore>> {
        let guard = self.leaderboard_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the primary question supply, if a backend provides one.
    pub async fn question_supply(&self) -> Option<Arc<dyn QuestionSupply>> {
        let guard = self.question_supply.read().await;
        guard.as_ref().cloned()
    }

    /// Directory consulted before a user may join a group's room.
    pub async fn membership(&self) -> Arc<dyn MembershipDirectory> {
        self.membership.read().await.clone()
    }

    /// Deterministic bank used whenever the question supply fails.
    pub fn fallback_questions(&self) -> &FallbackQuestionBank {
        &self.fallback_questions
    }

    /// Install the collaborators of a storage backend and leave degraded mode.
    pub async fn install_storage(&self, backend: StorageBackend) {
        {
            let mut guard = self.leaderboard_store.write().await;
            *guard = Some(backend.leaderboard);
        }
        if let Some(questions) = backend.questions {
            let mut guard = self.question_supply.write().await;
            *guard = Some(questions);
        }
        if let Some(membership) = backend.membership {
            if !self.roster_configured {
                let mut guard = self.membership.write().await;
                *guard = membership;
            }
        }
        self.update_degraded(false);
    }

    /// Remove the leaderboard store and enter degraded mode.
    pub async fn clear_leaderboard_store(&self) {
        {
            let mut guard = self.leaderboard_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Queue feeding the leaderboard finalizer.
    pub fn finalizer(&self) -> &mpsc::UnboundedSender<LeaderboardDelta> {
        &self.finalizer_tx
    }

    /// Hand the finalizer queue to its worker. Only the first call gets it.
    pub async fn take_finalizer_queue(&self) -> Option<mpsc::UnboundedReceiver<LeaderboardDelta>> {
        self.finalizer_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::leaderboard::InMemoryLeaderboardStore;

    #[tokio::test]
    async fn installing_storage_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());

        state
            .install_storage(StorageBackend {
                leaderboard: Arc::new(InMemoryLeaderboardStore::new()),
                questions: None,
                membership: None,
            })
            .await;
        assert!(!state.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        state.clear_leaderboard_store().await;
        assert!(state.is_degraded());
        assert!(state.leaderboard_store().await.is_none());
    }

    #[tokio::test]
    async fn finalizer_queue_is_handed_out_once() {
        let state = AppState::new(AppConfig::default());
        assert!(state.take_finalizer_queue().await.is_some());
        assert!(state.take_finalizer_queue().await.is_none());
    }

    #[tokio::test]
    async fn configured_roster_is_kept_over_backend_directory() {
        let mut config = AppConfig::default();
        config
            .membership
            .insert("smiths".into(), vec!["ann".into()]);
        let state = AppState::new(config);

        state
            .install_storage(StorageBackend {
                leaderboard: Arc::new(InMemoryLeaderboardStore::new()),
                questions: None,
                membership: Some(Arc::new(OpenMembership)),
            })
            .await;

        let directory = state.membership().await;
        assert!(!directory.is_member("smiths".into(), "eve".into()).await.unwrap());
    }
}
