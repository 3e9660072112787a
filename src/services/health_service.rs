use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health and the current boss, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let boss_index = state
        .coordinator()
        .view()
        .await
        .ok()
        .map(|view| view.boss_index);

    if state.is_degraded().await {
        HealthResponse::degraded(boss_index)
    } else {
        HealthResponse::ok(boss_index)
    }
}
