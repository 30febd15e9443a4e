//! Trivia Rooms Back binary entrypoint wiring the game WebSocket, REST views and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_rooms_back::{
    config::AppConfig,
    dao::leaderboard::InMemoryLeaderboardStore,
    routes,
    services::leaderboard_service,
    state::{AppState, SharedState, StorageBackend},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    tokio::spawn(leaderboard_service::run_finalizer(app_state.clone()));
    start_storage(app_state.clone()).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise CouchDB when `COUCH_BASE_URL` is set, otherwise keep the leaderboard in memory.
#[cfg(feature = "couch-store")]
async fn start_storage(state: SharedState) {
    use trivia_rooms_back::{
        dao::{
            couchdb::{CouchConfig, CouchStore},
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    match CouchConfig::from_env() {
        Ok(couch_config) => {
            info!(base_url = %couch_config.base_url, database = %couch_config.database, "using CouchDB storage");
            tokio::spawn(storage_supervisor::run(state, move || {
                let couch_config = couch_config.clone();
                async move {
                    let store = Arc::new(
                        CouchStore::connect(couch_config)
                            .await
                            .map_err(StorageError::from)?,
                    );
                    Ok::<_, StorageError>(StorageBackend {
                        leaderboard: store.clone(),
                        questions: Some(store.clone()),
                        membership: Some(store),
                    })
                }
            }));
        }
        Err(reason) => {
            info!(%reason, "CouchDB not configured; using in-memory leaderboard");
            install_in_memory(&state).await;
        }
    }
}

#[cfg(not(feature = "couch-store"))]
async fn start_storage(state: SharedState) {
    install_in_memory(&state).await;
}

async fn install_in_memory(state: &SharedState) {
    state
        .install_storage(StorageBackend {
            leaderboard: Arc::new(InMemoryLeaderboardStore::new()),
            questions: None,
            membership: None,
        })
        .await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
