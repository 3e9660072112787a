use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::RewardGrantEntity,
    dto::format_system_time,
    state::rewards::{ChestBundle, ChestTier, RewardBundle},
};

/// Pending or claimed grant as listed to its owner.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RewardGrantSummary {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    /// `null` past the ranked limit.
    pub rank: Option<u32>,
    pub damage: u64,
    pub bundle: RewardBundle,
    pub claimed: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<String>,
}

impl From<RewardGrantEntity> for RewardGrantSummary {
    fn from(value: RewardGrantEntity) -> Self {
        Self {
            encounter_id: value.encounter_id,
            boss_index: value.boss_index,
            rank: value.rank,
            damage: value.damage,
            bundle: value.bundle.into(),
            claimed: value.claimed,
            created_at: format_system_time(value.created_at),
            claimed_at: value.claimed_at.map(format_system_time),
        }
    }
}

/// Response of `GET /players/{id}/rewards`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerRewardsResponse {
    pub player_id: String,
    /// Number of grants still waiting to be claimed.
    pub pending: usize,
    pub grants: Vec<RewardGrantSummary>,
}

/// Result of a successful claim: the bundle credited and the balances after it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClaimResponse {
    pub encounter_id: Uuid,
    pub bundle: RewardBundle,
    pub currency: u64,
    pub chests: ChestBundle,
}

/// Result of opening one chest.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChestOpenedResponse {
    pub tier: ChestTier,
    pub currency_awarded: u64,
    pub currency: u64,
    /// Chests left after opening.
    pub chests: ChestBundle,
}
