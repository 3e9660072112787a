use std::time::SystemTime;

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    config::LevelingConfig,
    dto::format_system_time,
    state::{player::PlayerProfile, rewards::ChestBundle},
};

/// Badge currently held by a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BadgeSummary {
    pub id: String,
    pub expires_at: String,
}

/// Resource fields of a player as shown to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileSummary {
    pub player_id: String,
    pub level: u32,
    pub xp: u64,
    /// XP needed for the next level; 0 at the level cap.
    pub xp_to_next: u64,
    pub skill_points: u64,
    pub currency: u64,
    pub chests: ChestBundle,
    /// Expired badges are left out.
    pub badges: Vec<BadgeSummary>,
    pub unlocked_skills: Vec<String>,
}

impl ProfileSummary {
    pub fn from_profile(profile: &PlayerProfile, leveling: &LevelingConfig, now: SystemTime) -> Self {
        let xp_to_next = if profile.level >= leveling.max_level {
            0
        } else {
            PlayerProfile::xp_to_next(profile.level, leveling)
        };
        Self {
            player_id: profile.player_id.clone(),
            level: profile.level,
            xp: profile.xp,
            xp_to_next,
            skill_points: profile.skill_points,
            currency: profile.currency,
            chests: profile.chests,
            badges: profile
                .active_badges(now)
                .map(|badge| BadgeSummary {
                    id: badge.id.clone(),
                    expires_at: format_system_time(badge.expires_at),
                })
                .collect(),
            unlocked_skills: profile.unlocked_skills.iter().cloned().collect(),
        }
    }
}
