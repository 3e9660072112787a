use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::format_system_time,
    services::coordinator::EncounterView,
    state::{encounter::EncounterPhase, rewards::Standing},
};

/// Lifecycle status exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncounterStatus {
    Alive,
    Respawning,
    Finished,
}

/// One leaderboard row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingSummary {
    pub position: u32,
    pub player_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub damage: u64,
    pub damage_percent: f64,
    pub participation_score: u32,
    pub reward_eligible: bool,
}

impl From<Standing> for StandingSummary {
    fn from(value: Standing) -> Self {
        Self {
            position: value.position,
            player_id: value.player_id,
            display_name: value.display_name,
            avatar: value.avatar,
            damage: value.damage,
            damage_percent: value.damage_percent,
            participation_score: value.participation_score,
            reward_eligible: value.reward_eligible,
        }
    }
}

/// Response of `GET /encounter`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EncounterResponse {
    pub id: Uuid,
    pub boss_index: u32,
    pub name: String,
    pub title: String,
    pub max_health: u64,
    pub current_health: u64,
    pub health_percent: f64,
    /// Rage tier name (`calm`, `enraged`, ...).
    pub rage: String,
    /// Retaliation per landed hit at the current rage tier.
    pub thorns: u64,
    /// Dampening multiplier applied to incoming damage.
    pub multiplier: f64,
    pub throughput_ema: f64,
    pub status: EncounterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respawn_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub started_at: String,
    pub target_end_at: String,
    pub participants: usize,
    pub total_damage: u64,
    /// Top contributors, highest damage first.
    pub leaderboard: Vec<StandingSummary>,
}

impl From<EncounterView> for EncounterResponse {
    fn from(view: EncounterView) -> Self {
        let (status, killed_at, respawn_at, finished_at) = match view.phase {
            EncounterPhase::Alive => (EncounterStatus::Alive, None, None, None),
            EncounterPhase::Respawning {
                killed_at,
                respawn_at,
            } => (
                EncounterStatus::Respawning,
                Some(format_system_time(killed_at)),
                Some(format_system_time(respawn_at)),
                None,
            ),
            EncounterPhase::Finished { finished_at } => (
                EncounterStatus::Finished,
                None,
                None,
                Some(format_system_time(finished_at)),
            ),
        };

        Self {
            id: view.id,
            boss_index: view.boss_index,
            name: view.name,
            title: view.title,
            max_health: view.max_health,
            current_health: view.current_health,
            health_percent: view.health_percent,
            rage: view.rage.as_str().to_string(),
            thorns: view.thorns,
            multiplier: view.multiplier,
            throughput_ema: view.throughput_ema,
            status,
            killed_at,
            respawn_at,
            finished_at,
            started_at: format_system_time(view.started_at),
            target_end_at: format_system_time(view.target_end_at),
            participants: view.participants,
            total_damage: view.total_damage,
            leaderboard: view
                .leaderboard
                .into_iter()
                .map(StandingSummary::from)
                .collect(),
        }
    }
}

/// Response of `GET /encounter/previous`: the last resolved kill.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreviousEncounterResponse {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub boss_name: String,
    pub boss_title: String,
    pub total_damage: u64,
    pub killed_at: String,
    /// Player id of the final blow, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_blow: Option<String>,
    pub leaderboard: Vec<StandingSummary>,
}
