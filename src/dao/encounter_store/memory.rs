use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::EncounterStore;
use crate::dao::{
    models::{EncounterEntity, EncounterHistoryEntity, PlayerEntity, RewardGrantEntity},
    storage::{StorageError, StorageResult},
};

const GRANT_COLLECTION_NAME: &str = "reward_grants";
const HISTORY_COLLECTION_NAME: &str = "encounter_history";

/// Process-local backend. Used by tests and by `STORAGE_BACKEND=memory`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    encounter: RwLock<Option<EncounterEntity>>,
    players: DashMap<String, PlayerEntity>,
    grants: DashMap<(String, Uuid), RewardGrantEntity>,
    history: DashMap<Uuid, EncounterHistoryEntity>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageError::Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of kill history rows written so far.
    pub fn history_len(&self) -> usize {
        self.inner.history.len()
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store is offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ));
        }
        Ok(())
    }
}

impl EncounterStore for MemoryStore {
    fn save_encounter(&self, encounter: EncounterEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            *store.inner.encounter.write().await = Some(encounter);
            Ok(())
        })
    }

    fn find_encounter(&self) -> BoxFuture<'static, StorageResult<Option<EncounterEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            Ok(store.inner.encounter.read().await.clone())
        })
    }

    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            store.inner.players.insert(player.id.clone(), player);
            Ok(())
        })
    }

    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            Ok(store.inner.players.get(&id).map(|entry| entry.clone()))
        })
    }

    fn insert_reward_grant(
        &self,
        grant: RewardGrantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            let key = (grant.player_id.clone(), grant.encounter_id);
            match store.inner.grants.entry(key) {
                Entry::Occupied(_) => Err(StorageError::conflict(
                    GRANT_COLLECTION_NAME,
                    format!("{}:{}", grant.player_id, grant.encounter_id),
                )),
                Entry::Vacant(vacant) => {
                    vacant.insert(grant);
                    Ok(())
                }
            }
        })
    }

    fn find_reward_grant(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RewardGrantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            Ok(store
                .inner
                .grants
                .get(&(player_id, encounter_id))
                .map(|entry| entry.clone()))
        })
    }

    fn list_reward_grants(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RewardGrantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            let mut grants: Vec<_> = store
                .inner
                .grants
                .iter()
                .filter(|entry| entry.key().0 == player_id)
                .map(|entry| entry.value().clone())
                .collect();
            grants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(grants)
        })
    }

    fn mark_grant_claimed(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            let Some(mut grant) = store.inner.grants.get_mut(&(player_id, encounter_id)) else {
                return Ok(false);
            };
            if grant.claimed {
                return Ok(false);
            }
            grant.claimed = true;
            grant.claimed_at = Some(SystemTime::now());
            Ok(true)
        })
    }

    fn insert_encounter_history(
        &self,
        entry: EncounterHistoryEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            match store.inner.history.entry(entry.encounter_id) {
                Entry::Occupied(_) => Err(StorageError::conflict(
                    HISTORY_COLLECTION_NAME,
                    entry.encounter_id.to_string(),
                )),
                Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                    Ok(())
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::RewardBundleEntity;

    fn grant(player: &str, encounter_id: Uuid) -> RewardGrantEntity {
        RewardGrantEntity {
            player_id: player.into(),
            encounter_id,
            boss_index: 1,
            rank: Some(1),
            damage: 10,
            bundle: RewardBundleEntity::default(),
            claimed: false,
            created_at: SystemTime::now(),
            claimed_at: None,
        }
    }

    #[tokio::test]
    async fn grant_insert_is_append_only() {
        let store = MemoryStore::new();
        let encounter_id = Uuid::new_v4();
        store.insert_reward_grant(grant("a", encounter_id)).await.unwrap();
        let err = store
            .insert_reward_grant(grant("a", encounter_id))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        store.insert_reward_grant(grant("b", encounter_id)).await.unwrap();
        assert_eq!(store.list_reward_grants("a".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_flag_flips_once() {
        let store = MemoryStore::new();
        let encounter_id = Uuid::new_v4();
        store.insert_reward_grant(grant("a", encounter_id)).await.unwrap();

        assert!(store.mark_grant_claimed("a".into(), encounter_id).await.unwrap());
        assert!(!store.mark_grant_claimed("a".into(), encounter_id).await.unwrap());
        assert!(!store.mark_grant_claimed("z".into(), encounter_id).await.unwrap());

        let stored = store
            .find_reward_grant("a".into(), encounter_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.claimed);
        assert!(stored.claimed_at.is_some());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.find_encounter().await.is_err());
        store.set_offline(false);
        assert!(store.find_encounter().await.unwrap().is_none());
    }
}
