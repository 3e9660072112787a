#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod memory;

use crate::dao::models::{
    EncounterEntity, EncounterHistoryEntity, PlayerEntity, RewardGrantEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::MemoryStore;

/// Abstraction over the persistence layer for the encounter snapshot, player resources,
/// pending reward grants and the kill history.
///
/// Only per-row atomicity is assumed: no method spans several records.
pub trait EncounterStore: Send + Sync {
    fn save_encounter(&self, encounter: EncounterEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_encounter(&self) -> BoxFuture<'static, StorageResult<Option<EncounterEntity>>>;
    fn save_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Append-only; an existing `(player, encounter)` key yields `StorageError::Conflict`.
    fn insert_reward_grant(
        &self,
        grant: RewardGrantEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_reward_grant(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RewardGrantEntity>>>;
    fn list_reward_grants(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RewardGrantEntity>>>;
    /// Flip the claimed flag; `false` when the grant is missing or was already claimed.
    fn mark_grant_claimed(
        &self,
        player_id: String,
        encounter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn insert_encounter_history(
        &self,
        entry: EncounterHistoryEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
