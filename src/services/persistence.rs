//! Encounter snapshot writer.
//!
//! Mutations bump the coordinator revision; a burst of bumps is coalesced into one write per
//! debounce window. An unconditional write also happens on every snapshot interval.

use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, warn};

use crate::{error::ServiceError, state::SharedState};

/// Run until the coordinator goes away.
pub async fn run(state: SharedState) {
    let config = state.config();
    let mut revisions = state.coordinator().revisions();
    let mut periodic = interval(config.runtime.snapshot_interval);
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    debug!("coordinator stopped; snapshot writer exiting");
                    break;
                }
                sleep(config.runtime.persist_debounce).await;
            }
            _ = periodic.tick() => {}
        }

        let revision = *revisions.borrow_and_update();
        match persist_once(&state).await {
            Ok(()) => debug!(revision, "encounter snapshot written"),
            Err(ServiceError::Degraded) => debug!("storage unavailable; snapshot skipped"),
            Err(err) => warn!(error = %err, "failed to write encounter snapshot"),
        }
    }
}

/// Take a snapshot from the coordinator and upsert it.
pub async fn persist_once(state: &SharedState) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let snapshot = state.coordinator().snapshot().await?;
    store.save_encounter(snapshot).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::encounter_store::{EncounterStore, MemoryStore},
        services::coordinator::Coordinator,
        state::{AppState, participation::PlayerIdentity},
    };

    #[tokio::test]
    async fn damage_bursts_reach_storage_after_the_debounce() {
        let mut config = AppConfig::default();
        config.runtime.persist_debounce = Duration::from_millis(20);
        config.runtime.snapshot_interval = Duration::from_secs(3_600);

        let (state, inbox) = AppState::new(config);
        let store = MemoryStore::new();
        state.set_encounter_store(Arc::new(store.clone())).await;
        tokio::spawn(Coordinator::restore(state.clone(), inbox).await.run());
        tokio::spawn(run(state.clone()));

        let identity = PlayerIdentity {
            player_id: "a".into(),
            display_name: "A".into(),
            avatar: None,
        };
        for _ in 0..5 {
            state
                .coordinator()
                .damage(identity.clone(), vec![10])
                .await
                .unwrap();
        }

        let mut stored = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stored = store
                .find_encounter()
                .await
                .unwrap()
                .filter(|snapshot| snapshot.cumulative_damage == 50);
            if stored.is_some() {
                break;
            }
        }
        let stored = stored.expect("snapshot with all damage");
        assert_eq!(stored.leaderboard.len(), 1);
    }

    #[tokio::test]
    async fn persisting_without_a_store_is_degraded() {
        let (state, _inbox) = AppState::new(AppConfig::default());
        assert!(matches!(
            persist_once(&state).await,
            Err(ServiceError::Degraded)
        ));
    }
}
