//! Lazy profile loading and the dirty-profile flush.
//!
//! A slot is filled from storage at most once. After that the in-memory profile is the only
//! source of truth until the process exits.

use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    state::{
        SharedState,
        player::{PlayerProfile, PlayerSlot},
    },
};

/// Make sure `player_id` has a loaded slot, reading storage if needed.
///
/// Unknown players get a fresh level 1 profile. Needs a store unless already loaded.
pub async fn ensure_loaded(state: &SharedState, player_id: &str) -> Result<(), ServiceError> {
    if state
        .players()
        .get(player_id)
        .is_some_and(|slot| slot.is_loaded())
    {
        return Ok(());
    }

    let store = state.require_store().await?;
    let profile = match store.find_player(player_id.to_string()).await? {
        Some(entity) => PlayerProfile::from(entity),
        None => PlayerProfile::new(player_id, SystemTime::now()),
    };

    let mut slot = state
        .players()
        .entry(player_id.to_string())
        .or_insert_with(PlayerSlot::unloaded);
    if slot.install(profile) {
        debug!(%player_id, "player profile loaded");
    }
    Ok(())
}

/// Copy of a loaded profile.
pub fn profile_snapshot(state: &SharedState, player_id: &str) -> Option<PlayerProfile> {
    state
        .players()
        .get(player_id)
        .and_then(|slot| slot.profile().cloned())
}

/// Write every dirty profile. Failed writes re-arm the dirty flag for the next pass.
///
/// Returns the number of profiles written.
pub async fn flush_dirty(state: &SharedState) -> usize {
    let Some(store) = state.encounter_store().await else {
        return 0;
    };

    let dirty: Vec<PlayerProfile> = state
        .players()
        .iter_mut()
        .filter_map(|mut slot| slot.take_dirty())
        .collect();

    let mut written = 0;
    for profile in dirty {
        let player_id = profile.player_id.clone();
        match store.save_player(profile.into()).await {
            Ok(()) => written += 1,
            Err(err) => {
                warn!(%player_id, error = %err, "failed to flush player profile");
                if let Some(mut slot) = state.players().get_mut(&player_id) {
                    slot.mark_dirty();
                }
            }
        }
    }
    written
}

/// Write one profile now if it is dirty.
pub async fn flush_player(state: &SharedState, player_id: &str) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let Some(profile) = state
        .players()
        .get_mut(player_id)
        .and_then(|mut slot| slot.take_dirty())
    else {
        return Ok(());
    };

    if let Err(err) = store.save_player(profile.into()).await {
        if let Some(mut slot) = state.players().get_mut(player_id) {
            slot.mark_dirty();
        }
        return Err(err.into());
    }
    Ok(())
}

/// Periodic flush, plus housekeeping of expired claim locks.
pub async fn run_flush_loop(state: SharedState) {
    let period = state.config().runtime.profile_flush_interval;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let written = flush_dirty(&state).await;
        if written > 0 {
            debug!(written, "player profiles flushed");
        }
        let purged = state.claims().purge_expired(SystemTime::now());
        if purged > 0 {
            info!(purged, "expired claim locks removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::encounter_store::{EncounterStore, MemoryStore},
        state::AppState,
    };

    async fn state_with_store() -> (SharedState, MemoryStore) {
        let (state, _inbox) = AppState::new(AppConfig::default());
        let store = MemoryStore::new();
        state.set_encounter_store(Arc::new(store.clone())).await;
        (state, store)
    }

    #[tokio::test]
    async fn loaded_profiles_are_never_reread() {
        let (state, store) = state_with_store().await;
        ensure_loaded(&state, "a").await.unwrap();
        state
            .players()
            .get_mut("a")
            .unwrap()
            .mutate(|profile| profile.currency = 50);

        let mut stale = PlayerProfile::new("a", SystemTime::now());
        stale.currency = 1;
        store.save_player(stale.into()).await.unwrap();

        ensure_loaded(&state, "a").await.unwrap();
        assert_eq!(profile_snapshot(&state, "a").unwrap().currency, 50);
    }

    #[tokio::test]
    async fn failed_flush_keeps_the_profile_dirty() {
        let (state, store) = state_with_store().await;
        ensure_loaded(&state, "a").await.unwrap();
        state
            .players()
            .get_mut("a")
            .unwrap()
            .mutate(|profile| profile.currency = 7);

        store.set_offline(true);
        assert_eq!(flush_dirty(&state).await, 0);
        assert!(state.players().get("a").unwrap().is_dirty());

        store.set_offline(false);
        assert_eq!(flush_dirty(&state).await, 1);
        assert!(!state.players().get("a").unwrap().is_dirty());
        let stored = store.find_player("a".into()).await.unwrap().unwrap();
        assert_eq!(stored.currency, 7);
    }

    #[tokio::test]
    async fn loading_requires_a_store() {
        let (state, _inbox) = AppState::new(AppConfig::default());
        let err = ensure_loaded(&state, "a").await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
        assert!(profile_snapshot(&state, "a").is_none());
    }
}
