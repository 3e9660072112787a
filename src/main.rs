//! World boss backend entrypoint wiring REST, WebSocket, SSE and the storage backend.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "mongo-store")]
use world_boss_back::{
    dao::{
        encounter_store::{
            EncounterStore,
            mongodb::{MongoEncounterStore, MongoSettings},
        },
        storage::StorageError,
    },
    services::storage_supervisor,
};
use world_boss_back::{
    config::AppConfig,
    dao::encounter_store::MemoryStore,
    routes,
    services::{
        coordinator::{self, Coordinator},
        persistence, player_service, sse_events,
    },
    state::{AppState, SharedState},
};

/// How long start-up waits for storage before restoring the encounter without it.
const STORE_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let (app_state, inbox) = AppState::new(AppConfig::load());

    install_storage(&app_state).await?;
    wait_for_store(&app_state).await;

    let coordinator = Coordinator::restore(app_state.clone(), inbox).await;
    tokio::spawn(coordinator.run());
    let _timers = coordinator::spawn_timers(app_state.coordinator(), &app_state.config());
    tokio::spawn(persistence::run(app_state.clone()));
    tokio::spawn(player_service::run_flush_loop(app_state.clone()));
    tokio::spawn(broadcast_degraded_changes(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

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

    flush_before_exit(&app_state).await;
    Ok(())
}

/// Install the backend selected by `STORAGE_BACKEND` (`mongo` by default).
async fn install_storage(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "mongo".into());
    match backend.as_str() {
        "memory" => {
            info!("using in-memory storage; nothing survives a restart");
            state.set_encounter_store(Arc::new(MemoryStore::new())).await;
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            tokio::spawn(storage_supervisor::run(state.clone(), connect_mongo));
        }
        other => anyhow::bail!("unsupported STORAGE_BACKEND `{other}`"),
    }
    Ok(())
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn EncounterStore>, StorageError> {
    let settings = MongoSettings::from_env()?;
    let store = MongoEncounterStore::connect(settings).await?;
    Ok(Arc::new(store))
}

/// Give the supervisor a moment so the persisted encounter can be restored.
async fn wait_for_store(state: &SharedState) {
    let mut degraded = state.degraded_watcher();
    let ready = matches!(
        tokio::time::timeout(STORE_WAIT, degraded.wait_for(|degraded| !*degraded)).await,
        Ok(Ok(_))
    );
    if !ready {
        warn!("storage not ready; starting in degraded mode");
    }
}

/// Relay degraded-mode transitions to SSE subscribers.
async fn broadcast_degraded_changes(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    while degraded.changed().await.is_ok() {
        let value = *degraded.borrow_and_update();
        info!(degraded = value, "degraded mode changed");
        sse_events::broadcast_system_status(&state, value);
    }
}

/// Last chance to write dirty profiles and the encounter snapshot.
async fn flush_before_exit(state: &SharedState) {
    let written = player_service::flush_dirty(state).await;
    if let Err(err) = persistence::persist_once(state).await {
        warn!(error = %err, "final encounter snapshot failed");
    }
    info!(profiles = written, "shutdown flush complete");
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
