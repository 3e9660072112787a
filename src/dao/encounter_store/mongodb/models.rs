use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    EncounterEntity, EncounterHistoryEntity, PlayerEntity, RewardBundleEntity, RewardGrantEntity,
};

/// Key of the single encounter snapshot row.
pub const CURRENT_ENCOUNTER_KEY: &str = "current";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoEncounterDocument {
    #[serde(rename = "_id")]
    key: String,
    updated_at: DateTime,
    snapshot: EncounterEntity,
}

impl From<EncounterEntity> for MongoEncounterDocument {
    fn from(value: EncounterEntity) -> Self {
        Self {
            key: CURRENT_ENCOUNTER_KEY.to_owned(),
            updated_at: DateTime::from_system_time(value.updated_at),
            snapshot: value,
        }
    }
}

impl From<MongoEncounterDocument> for EncounterEntity {
    fn from(value: MongoEncounterDocument) -> Self {
        value.snapshot
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    updated_at: DateTime,
    profile: PlayerEntity,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.clone(),
            updated_at: DateTime::from_system_time(value.updated_at),
            profile: value,
        }
    }
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        value.profile
    }
}

/// Grant row. `claimed` lives at the top level so the claim can be a single
/// conditional update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGrantDocument {
    #[serde(rename = "_id")]
    key: String,
    player_id: String,
    encounter_id: String,
    boss_index: i64,
    rank: Option<i64>,
    damage: i64,
    bundle: RewardBundleEntity,
    claimed: bool,
    created_at: DateTime,
    claimed_at: Option<DateTime>,
}

impl From<RewardGrantEntity> for MongoGrantDocument {
    fn from(value: RewardGrantEntity) -> Self {
        Self {
            key: grant_key(&value.player_id, value.encounter_id),
            player_id: value.player_id,
            encounter_id: value.encounter_id.to_string(),
            boss_index: value.boss_index as i64,
            rank: value.rank.map(i64::from),
            damage: value.damage.min(i64::MAX as u64) as i64,
            bundle: value.bundle,
            claimed: value.claimed,
            created_at: DateTime::from_system_time(value.created_at),
            claimed_at: value.claimed_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoGrantDocument> for RewardGrantEntity {
    type Error = String;

    fn try_from(value: MongoGrantDocument) -> Result<Self, Self::Error> {
        let encounter_id = Uuid::parse_str(&value.encounter_id)
            .map_err(|err| format!("grant `{}` has an invalid encounter id: {err}", value.key))?;
        Ok(Self {
            player_id: value.player_id,
            encounter_id,
            boss_index: u32::try_from(value.boss_index).unwrap_or_default(),
            rank: value.rank.and_then(|rank| u32::try_from(rank).ok()),
            damage: u64::try_from(value.damage).unwrap_or_default(),
            bundle: value.bundle,
            claimed: value.claimed,
            created_at: value.created_at.to_system_time(),
            claimed_at: value.claimed_at.map(DateTime::to_system_time),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHistoryDocument {
    #[serde(rename = "_id")]
    encounter_id: String,
    killed_at: DateTime,
    entry: EncounterHistoryEntity,
}

impl From<EncounterHistoryEntity> for MongoHistoryDocument {
    fn from(value: EncounterHistoryEntity) -> Self {
        Self {
            encounter_id: value.encounter_id.to_string(),
            killed_at: DateTime::from_system_time(value.killed_at),
            entry: value,
        }
    }
}

pub fn grant_key(player_id: &str, encounter_id: Uuid) -> String {
    format!("{player_id}:{encounter_id}")
}

pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}
