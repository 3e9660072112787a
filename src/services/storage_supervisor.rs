//! Keeps a storage backend installed in the shared state.
//!
//! While no healthy backend is available the state stays degraded and the encounter keeps
//! running in memory.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{encounter_store::EncounterStore, storage::StorageError},
    state::SharedState,
};

/// Delays and limits used by the supervisor loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    /// First backoff delay after a failure.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Interval between health checks of an installed store.
    pub health_poll: Duration,
    /// Reconnect attempts on an installed store before it is dropped.
    pub reconnect_attempts: u32,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            health_poll: Duration::from_secs(5),
            reconnect_attempts: 3,
        }
    }
}

/// Supervise with the default timing. Never returns.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn EncounterStore>, StorageError>> + Send,
{
    run_with(state, connect, SupervisorTiming::default()).await
}

/// Supervise with explicit timing.
pub async fn run_with<F, Fut>(state: SharedState, mut connect: F, timing: SupervisorTiming)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn EncounterStore>, StorageError>> + Send,
{
    let mut delay = timing.initial_delay;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_encounter_store(store.clone()).await;
                info!("storage connected; leaving degraded mode");
                delay = timing.initial_delay;

                watch_store(&state, store.as_ref(), &timing).await;

                warn!("storage reconnects exhausted; dropping the store");
                state.clear_encounter_store().await;
            }
            Err(err) => warn!(error = %err, "storage connection attempt failed"),
        }

        sleep(delay).await;
        delay = (delay * 2).min(timing.max_delay);
    }
}

/// Poll an installed store until it fails and cannot be brought back.
async fn watch_store(state: &SharedState, store: &dyn EncounterStore, timing: &SupervisorTiming) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded().await {
                info!("storage healthy again; leaving degraded mode");
                state.update_degraded(false).await;
            }
            sleep(timing.health_poll).await;
            continue;
        }

        if !reconnect(state, store, timing).await {
            return;
        }
        state.update_degraded(false).await;
        sleep(timing.health_poll).await;
    }
}

/// Retry `try_reconnect` with backoff. The first failure puts the state in degraded mode.
async fn reconnect(state: &SharedState, store: &dyn EncounterStore, timing: &SupervisorTiming) -> bool {
    let mut delay = timing.initial_delay;

    for attempt in 0..timing.reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnected after a failed health check");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(error = %err, "storage unreachable; entering degraded mode");
                    state.update_degraded(true).await;
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(delay).await;
                delay = (delay * 2).min(timing.max_delay);
            }
        }
    }
    false
}
