use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    bootstrap::{Collections, MongoSettings, ensure_indexes, open_database},
    error::{MongoDaoError, MongoResult},
    models::{
        CURRENT_ENCOUNTER_KEY, MongoEncounterDocument, MongoGrantDocument, MongoHistoryDocument,
        MongoPlayerDocument, doc_id, grant_key,
    },
};
use crate::dao::{
    encounter_store::EncounterStore,
    models::{EncounterEntity, EncounterHistoryEntity, PlayerEntity, RewardGrantEntity},
    storage::StorageResult,
};

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoEncounterStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    settings: MongoSettings,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.settings).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

impl MongoEncounterStore {
    /// Connect to MongoDB and ensure indexes are present.
    pub async fn connect(settings: MongoSettings) -> MongoResult<Self> {
        let (client, database) = open_database(&settings).await?;
        ensure_indexes(&database, &settings.collections).await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                settings,
            }),
        })
    }

    fn collections(&self) -> &Collections {
        &self.inner.settings.collections
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn encounter_collection(&self) -> Collection<MongoEncounterDocument> {
        self.database().await.collection(&self.collections().encounters)
    }

    async fn player_collection(&self) -> Collection<MongoPlayerDocument> {
        self.database().await.collection(&self.collections().players)
    }

    async fn grant_collection(&self) -> Collection<MongoGrantDocument> {
        self.database().await.collection(&self.collections().grants)
    }

    async fn history_collection(&self) -> Collection<MongoHistoryDocument> {
        self.database().await.collection(&self.collections().history)
    }

    async fn save_encounter(&self, encounter: EncounterEntity) -> MongoResult<()> {
        let id = encounter.id;
        let document: MongoEncounterDocument = encounter.into();
        self.encounter_collection()
            .await
            .replace_one(doc_id(CURRENT_ENCOUNTER_KEY), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveEncounter { id, source })?;
        Ok(())
    }

    async fn find_encounter(&self) -> MongoResult<Option<EncounterEntity>> {
        let document = self
            .encounter_collection()
            .await
            .find_one(doc_id(CURRENT_ENCOUNTER_KEY))
            .await
            .map_err(|source| MongoDaoError::LoadEncounter { source })?;
        Ok(document.map(Into::into))
    }

    async fn save_player(&self, player: PlayerEntity) -> MongoResult<()> {
        let id = player.id.clone();
        let document: MongoPlayerDocument = player.into();
        self.player_collection()
            .await
            .replace_one(doc_id(&id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer { id, source })?;
        Ok(())
    }

    async fn find_player(&self, id: String) -> MongoResult<Option<PlayerEntity>> {
        let document = self
            .player_collection()
            .await
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadPlayer { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn insert_reward_grant(&self, grant: RewardGrantEntity) -> MongoResult<()> {
        let key = grant_key(&grant.player_id, grant.encounter_id);
        let document: MongoGrantDocument = grant.into();
        self.grant_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateKey {
                        collection: self.collections().grants.clone(),
                        key,
                        source,
                    }
                } else {
                    MongoDaoError::Insert {
                        collection: self.collections().grants.clone(),
                        source,
                    }
                }
            })?;
        Ok(())
    }

    async fn find_reward_grant(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> MongoResult<Option<RewardGrantEntity>> {
        let document = self
            .grant_collection()
            .await
            .find_one(doc_id(&grant_key(&player_id, encounter_id)))
            .await
            .map_err(|source| MongoDaoError::LoadGrants {
                player_id: player_id.clone(),
                source,
            })?;

        document
            .map(|document| {
                RewardGrantEntity::try_from(document).map_err(|reason| MongoDaoError::Malformed {
                    collection: self.collections().grants.clone(),
                    reason,
                })
            })
            .transpose()
    }

    async fn list_reward_grants(&self, player_id: String) -> MongoResult<Vec<RewardGrantEntity>> {
        let documents: Vec<MongoGrantDocument> = self
            .grant_collection()
            .await
            .find(doc! { "player_id": player_id.as_str() })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|source| MongoDaoError::LoadGrants {
                player_id: player_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadGrants {
                player_id: player_id.clone(),
                source,
            })?;

        documents
            .into_iter()
            .map(|document| {
                RewardGrantEntity::try_from(document).map_err(|reason| MongoDaoError::Malformed {
                    collection: self.collections().grants.clone(),
                    reason,
                })
            })
            .collect()
    }

    async fn mark_grant_claimed(&self, player_id: String, encounter_id: Uuid) -> MongoResult<bool> {
        let now = DateTime::from_system_time(SystemTime::now());
        let result = self
            .grant_collection()
            .await
            .update_one(
                doc! { "_id": grant_key(&player_id, encounter_id), "claimed": false },
                doc! { "$set": { "claimed": true, "claimed_at": now } },
            )
            .await
            .map_err(|source| MongoDaoError::ClaimGrant {
                player_id,
                encounter_id,
                source,
            })?;
        Ok(result.modified_count == 1)
    }

    async fn insert_encounter_history(&self, entry: EncounterHistoryEntity) -> MongoResult<()> {
        let key = entry.encounter_id.to_string();
        let document: MongoHistoryDocument = entry.into();
        self.history_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateKey {
                        collection: self.collections().history.clone(),
                        key,
                        source,
                    }
                } else {
                    MongoDaoError::Insert {
                        collection: self.collections().history.clone(),
                        source,
                    }
                }
            })?;
        Ok(())
    }
}

impl EncounterStore for MongoEncounterStore {
    fn save_encounter(&self, encounter: EncounterEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_encounter(encounter).await.map_err(Into::into) })
    }

    fn find_encounter(&self) -> BoxFuture<'static, StorageResult<Option<EncounterEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_encounter().await.map_err(Into::into) })
    }

    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_player(player).await.map_err(Into::into) })
    }

    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(id).await.map_err(Into::into) })
    }

    fn insert_reward_grant(
        &self,
        grant: RewardGrantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_reward_grant(grant).await.map_err(Into::into) })
    }

    fn find_reward_grant(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RewardGrantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_reward_grant(player_id, encounter_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_reward_grants(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RewardGrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_reward_grants(player_id).await.map_err(Into::into) })
    }

    fn mark_grant_claimed(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .mark_grant_claimed(player_id, encounter_id)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_encounter_history(
        &self,
        entry: EncounterHistoryEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_encounter_history(entry).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
