use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Persisted lifecycle phase of the encounter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EncounterPhaseEntity {
    Alive,
    Respawning {
        killed_at: SystemTime,
        respawn_at: SystemTime,
    },
    Finished {
        finished_at: SystemTime,
    },
}

/// Authoritative encounter snapshot. There is a single row, upserted in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncounterEntity {
    /// Identifier of the current spawn.
    pub id: Uuid,
    /// 1-based roster index.
    pub boss_index: u32,
    pub max_health: u64,
    pub current_health: u64,
    pub cumulative_damage: u64,
    pub started_at: SystemTime,
    pub target_end_at: SystemTime,
    pub multiplier: f64,
    pub throughput_ema: f64,
    pub last_sample_at: SystemTime,
    pub last_sample_damage: u64,
    pub phase: EncounterPhaseEntity,
    /// Whether kill resolution already ran for this spawn.
    pub kill_resolved: bool,
    /// Contribution records of the current spawn, in first-contribution order.
    pub leaderboard: Vec<LeaderboardRecord>,
    /// Summary of the last resolved kill, for the "previous encounter" view.
    pub previous: Option<EncounterSummaryEntity>,
    pub updated_at: SystemTime,
}

/// Frozen leaderboard of a resolved kill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncounterSummaryEntity {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub boss_name: String,
    pub boss_title: String,
    pub total_damage: u64,
    pub killed_at: SystemTime,
    /// Player who landed the final blow.
    pub final_blow: Option<String>,
    /// Sorted by damage, highest first.
    pub leaderboard: Vec<LeaderboardRecord>,
}

/// Versioned leaderboard row. Readers always go through [`LeaderboardRecord::migrate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "schema")]
pub enum LeaderboardRecord {
    /// Early rows only kept the damage total.
    #[serde(rename = "v1")]
    V1(LeaderboardV1),
    #[serde(rename = "v2")]
    V2(LeaderboardV2),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardV1 {
    pub player_id: String,
    pub damage: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardV2 {
    pub player_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub damage: u64,
    pub eligible: bool,
    pub participation_score: u32,
    pub active_time_ms: u64,
    pub last_action_at: SystemTime,
    /// Absent in rows written before ping timing was tracked.
    #[serde(default)]
    pub last_ping_at: Option<SystemTime>,
    pub last_damage_snapshot: u64,
    pub abilities_used: Vec<String>,
}

impl LeaderboardRecord {
    /// Current-schema view of the row. Fields a legacy row never carried get neutral
    /// values: no eligibility, no score, last action at the epoch.
    pub fn migrate(self) -> LeaderboardV2 {
        match self {
            LeaderboardRecord::V1(legacy) => LeaderboardV2 {
                display_name: legacy.player_id.clone(),
                player_id: legacy.player_id,
                avatar: None,
                damage: legacy.damage,
                eligible: false,
                participation_score: 0,
                active_time_ms: 0,
                last_action_at: SystemTime::UNIX_EPOCH,
                last_ping_at: None,
                last_damage_snapshot: legacy.damage,
                abilities_used: Vec::new(),
            },
            LeaderboardRecord::V2(current) => current,
        }
    }
}

impl From<LeaderboardV2> for LeaderboardRecord {
    fn from(value: LeaderboardV2) -> Self {
        LeaderboardRecord::V2(value)
    }
}

/// Chest quantities as stored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChestCountsEntity {
    pub gold: u32,
    pub silver: u32,
    pub bronze: u32,
    pub wooden: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BadgeGrantEntity {
    pub id: String,
    pub duration_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardBundleEntity {
    pub chests: ChestCountsEntity,
    pub currency: Option<u64>,
    pub badge: Option<BadgeGrantEntity>,
}

/// All-or-nothing reward created at kill time, keyed by `(player_id, encounter_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardGrantEntity {
    pub player_id: String,
    pub encounter_id: Uuid,
    pub boss_index: u32,
    /// `None` past the ranked limit.
    pub rank: Option<u32>,
    pub damage: u64,
    pub bundle: RewardBundleEntity,
    pub claimed: bool,
    pub created_at: SystemTime,
    pub claimed_at: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BadgeEntity {
    pub id: String,
    pub expires_at: SystemTime,
}

/// Player resource fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub id: String,
    pub level: u32,
    pub xp: u64,
    pub skill_points: u64,
    pub currency: u64,
    pub chests: ChestCountsEntity,
    pub badges: Vec<BadgeEntity>,
    pub unlocked_skills: Vec<String>,
    pub updated_at: SystemTime,
}

/// Append-only log row written once per resolved kill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterHistoryEntity {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub boss_name: String,
    pub max_health: u64,
    pub total_damage: u64,
    pub participants: u32,
    pub started_at: SystemTime,
    pub killed_at: SystemTime,
    pub final_blow: Option<String>,
    pub top_damage: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_rows_are_tagged_and_migrated() {
        let raw = r#"[
            {"schema":"v1","player_id":"old","damage":42},
            {"schema":"v2","player_id":"new","display_name":"New","avatar":null,"damage":7,
             "eligible":true,"participation_score":3,"active_time_ms":30000,
             "last_action_at":{"secs_since_epoch":100,"nanos_since_epoch":0},
             "last_damage_snapshot":5,"abilities_used":["cleave"]}
        ]"#;
        let rows: Vec<LeaderboardRecord> = serde_json::from_str(raw).unwrap();
        let migrated: Vec<_> = rows.into_iter().map(LeaderboardRecord::migrate).collect();

        assert_eq!(migrated[0].player_id, "old");
        assert_eq!(migrated[0].display_name, "old");
        assert_eq!(migrated[0].damage, 42);
        assert!(!migrated[0].eligible);
        assert_eq!(migrated[0].last_action_at, SystemTime::UNIX_EPOCH);

        assert_eq!(migrated[1].participation_score, 3);
        assert_eq!(migrated[1].last_ping_at, None);
        assert_eq!(migrated[1].abilities_used, vec!["cleave".to_string()]);
    }

    #[test]
    fn new_rows_are_written_with_current_schema() {
        let legacy = LeaderboardRecord::V1(LeaderboardV1 {
            player_id: "p".into(),
            damage: 1,
        });
        let record: LeaderboardRecord = legacy.migrate().into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["schema"], "v2");
        assert_eq!(json["damage"], 1);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let raw = r#"{"schema":"v9","player_id":"x","damage":1}"#;
        assert!(serde_json::from_str::<LeaderboardRecord>(raw).is_err());
    }
}
