//! In-memory player profiles.
//!
//! A loaded profile is authoritative: gameplay mutates it in place and marks the slot dirty,
//! and the flush loop writes dirty profiles back. Storage is never re-read for a slot that is
//! already loaded.

use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime},
};

use thiserror::Error;

use crate::{
    config::{AbilityDefinition, LevelingConfig},
    dao::models::{BadgeEntity, PlayerEntity},
    state::rewards::{ChestBundle, ChestTier, RewardBundle},
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Errors raised by profile mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("not enough resource")]
    NotEnoughSkillPoints { needed: u64, available: u64 },
    #[error("skill `{0}` is not unlocked")]
    SkillLocked(String),
    #[error("no {0:?} chest left")]
    NoChest(ChestTier),
}

/// Badge held by a player until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBadge {
    pub id: String,
    pub expires_at: SystemTime,
}

/// Level change produced by crediting experience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelProgress {
    pub previous_level: u32,
    pub level: u32,
    /// Abilities unlocked by this change.
    pub unlocked: Vec<String>,
}

impl LevelProgress {
    pub fn leveled_up(&self) -> bool {
        self.level > self.previous_level
    }
}

/// Resource fields of one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub player_id: String,
    pub level: u32,
    /// Experience accumulated towards the next level.
    pub xp: u64,
    pub skill_points: u64,
    pub currency: u64,
    pub chests: ChestBundle,
    pub badges: Vec<ActiveBadge>,
    pub unlocked_skills: BTreeSet<String>,
    pub updated_at: SystemTime,
}

impl PlayerProfile {
    /// Level 1 profile with nothing in it.
    pub fn new(player_id: impl Into<String>, now: SystemTime) -> Self {
        Self {
            player_id: player_id.into(),
            level: 1,
            xp: 0,
            skill_points: 0,
            currency: 0,
            chests: ChestBundle::default(),
            badges: Vec::new(),
            unlocked_skills: BTreeSet::new(),
            updated_at: now,
        }
    }

    /// XP needed to go from `level` to `level + 1`.
    pub fn xp_to_next(level: u32, config: &LevelingConfig) -> u64 {
        config.xp_per_level.saturating_mul(level as u64)
    }

    /// Credit experience, levelling up as many times as it covers and unlocking abilities.
    pub fn apply_experience(
        &mut self,
        xp: u64,
        config: &LevelingConfig,
        abilities: &[AbilityDefinition],
    ) -> LevelProgress {
        let previous_level = self.level;
        self.xp = self.xp.saturating_add(xp);

        while self.level < config.max_level {
            let need = Self::xp_to_next(self.level, config);
            if need == 0 || self.xp < need {
                break;
            }
            self.xp -= need;
            self.level += 1;
        }
        if self.level >= config.max_level {
            self.level = config.max_level;
            self.xp = 0;
        }

        LevelProgress {
            previous_level,
            level: self.level,
            unlocked: self.unlock_skills(abilities),
        }
    }

    /// Add every ability whose unlock level has been reached; returns the new ones.
    pub fn unlock_skills(&mut self, abilities: &[AbilityDefinition]) -> Vec<String> {
        abilities
            .iter()
            .filter(|ability| ability.unlock_level <= self.level)
            .filter(|ability| self.unlocked_skills.insert(ability.id.clone()))
            .map(|ability| ability.id.clone())
            .collect()
    }

    pub fn grant_skill_points(&mut self, amount: u64) {
        self.skill_points = self.skill_points.saturating_add(amount);
    }

    /// Check that `ability` can be cast and deduct its cost.
    pub fn spend_for_ability(&mut self, ability: &AbilityDefinition) -> Result<(), PlayerError> {
        if !self.unlocked_skills.contains(&ability.id) {
            return Err(PlayerError::SkillLocked(ability.id.clone()));
        }
        if self.skill_points < ability.sp_cost {
            return Err(PlayerError::NotEnoughSkillPoints {
                needed: ability.sp_cost,
                available: self.skill_points,
            });
        }
        self.skill_points -= ability.sp_cost;
        Ok(())
    }

    /// Credit a claimed reward bundle in full.
    pub fn credit_bundle(&mut self, bundle: &RewardBundle, now: SystemTime) {
        self.chests.add(&bundle.chests);
        if let Some(currency) = bundle.currency {
            self.currency = self.currency.saturating_add(currency);
        }
        if let Some(badge) = &bundle.badge {
            let expires_at =
                now + Duration::from_secs(SECONDS_PER_DAY * badge.duration_days as u64);
            match self.badges.iter_mut().find(|held| held.id == badge.id) {
                Some(held) => held.expires_at = held.expires_at.max(expires_at),
                None => self.badges.push(ActiveBadge {
                    id: badge.id.clone(),
                    expires_at,
                }),
            }
        }
        self.updated_at = now;
    }

    /// Consume one chest of `tier`.
    pub fn take_chest(&mut self, tier: ChestTier) -> Result<(), PlayerError> {
        if self.chests.take(tier) {
            Ok(())
        } else {
            Err(PlayerError::NoChest(tier))
        }
    }

    /// Badges that have not expired at `now`.
    pub fn active_badges(&self, now: SystemTime) -> impl Iterator<Item = &ActiveBadge> {
        self.badges.iter().filter(move |badge| badge.expires_at > now)
    }
}

impl From<PlayerEntity> for PlayerProfile {
    fn from(value: PlayerEntity) -> Self {
        Self {
            player_id: value.id,
            level: value.level.max(1),
            xp: value.xp,
            skill_points: value.skill_points,
            currency: value.currency,
            chests: value.chests.into(),
            badges: value
                .badges
                .into_iter()
                .map(|badge| ActiveBadge {
                    id: badge.id,
                    expires_at: badge.expires_at,
                })
                .collect(),
            unlocked_skills: value.unlocked_skills.into_iter().collect(),
            updated_at: value.updated_at,
        }
    }
}

impl From<PlayerProfile> for PlayerEntity {
    fn from(value: PlayerProfile) -> Self {
        Self {
            id: value.player_id,
            level: value.level,
            xp: value.xp,
            skill_points: value.skill_points,
            currency: value.currency,
            chests: value.chests.into(),
            badges: value
                .badges
                .into_iter()
                .map(|badge| BadgeEntity {
                    id: badge.id,
                    expires_at: badge.expires_at,
                })
                .collect(),
            unlocked_skills: value.unlocked_skills.into_iter().collect(),
            updated_at: value.updated_at,
        }
    }
}

/// Cache slot for one player.
///
/// `loaded` flips once, when the stored profile (or a fresh one for unknown players) is
/// installed. Until then `profile` is `None` and every mutation is refused.
#[derive(Debug, Default)]
pub struct PlayerSlot {
    loaded: bool,
    profile: Option<PlayerProfile>,
    dirty: bool,
}

impl PlayerSlot {
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Install a profile read from storage. Ignored when the slot is already loaded so a late
    /// read never clobbers fresher in-memory values.
    pub fn install(&mut self, profile: PlayerProfile) -> bool {
        if self.loaded {
            return false;
        }
        self.profile = Some(profile);
        self.loaded = true;
        true
    }

    pub fn profile(&self) -> Option<&PlayerProfile> {
        self.profile.as_ref().filter(|_| self.loaded)
    }

    /// Mutate the loaded profile and mark the slot dirty. `None` when not loaded.
    pub fn mutate<T>(&mut self, f: impl FnOnce(&mut PlayerProfile) -> T) -> Option<T> {
        if !self.loaded {
            return None;
        }
        let profile = self.profile.as_mut()?;
        let result = f(profile);
        self.dirty = true;
        Some(result)
    }

    /// Copy of the profile to flush, clearing the dirty flag.
    pub fn take_dirty(&mut self) -> Option<PlayerProfile> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.profile().cloned()
    }

    /// Re-arm the dirty flag after a failed flush.
    pub fn mark_dirty(&mut self) {
        if self.loaded {
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::rewards::BadgeGrant};

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn experience_levels_up_and_unlocks_skills() {
        let config = AppConfig::default();
        let mut profile = PlayerProfile::new("p1", now());

        // 1000 (1->2) + 2000 (2->3) + 500 left over.
        let progress = profile.apply_experience(3_500, &config.leveling, &config.abilities);
        assert_eq!(progress.previous_level, 1);
        assert_eq!(progress.level, 3);
        assert!(progress.leveled_up());
        assert_eq!(progress.unlocked, vec!["cleave".to_string()]);
        assert_eq!(profile.xp, 500);

        let progress = profile.apply_experience(10, &config.leveling, &config.abilities);
        assert!(!progress.leveled_up());
        assert!(progress.unlocked.is_empty());
    }

    #[test]
    fn experience_stops_at_max_level() {
        let mut config = AppConfig::default();
        config.leveling.max_level = 3;
        let mut profile = PlayerProfile::new("p1", now());
        let progress = profile.apply_experience(u64::MAX, &config.leveling, &[]);
        assert_eq!(progress.level, 3);
        assert_eq!(profile.xp, 0);
    }

    #[test]
    fn abilities_need_unlock_and_skill_points() {
        let config = AppConfig::default();
        let cleave = config.ability("cleave").unwrap();
        let mut profile = PlayerProfile::new("p1", now());

        assert_eq!(
            profile.spend_for_ability(cleave),
            Err(PlayerError::SkillLocked("cleave".into()))
        );

        profile.level = 3;
        profile.unlock_skills(&config.abilities);
        let err = profile.spend_for_ability(cleave).unwrap_err();
        assert_eq!(err.to_string(), "not enough resource");

        profile.grant_skill_points(2);
        assert_eq!(profile.spend_for_ability(cleave), Ok(()));
        assert_eq!(profile.skill_points, 1);
    }

    #[test]
    fn bundle_credit_extends_badges() {
        let mut profile = PlayerProfile::new("p1", now());
        let bundle = RewardBundle {
            chests: ChestBundle {
                gold: 1,
                wooden: 2,
                ..ChestBundle::default()
            },
            currency: Some(600),
            badge: Some(BadgeGrant {
                id: "slayer".into(),
                duration_days: 7,
            }),
        };
        profile.credit_bundle(&bundle, now());
        profile.credit_bundle(&bundle, now() + Duration::from_secs(SECONDS_PER_DAY));

        assert_eq!(profile.chests.gold, 2);
        assert_eq!(profile.chests.wooden, 4);
        assert_eq!(profile.currency, 1_200);
        assert_eq!(profile.badges.len(), 1);
        assert_eq!(
            profile.badges[0].expires_at,
            now() + Duration::from_secs(SECONDS_PER_DAY * 8)
        );
        assert_eq!(
            profile
                .active_badges(now() + Duration::from_secs(SECONDS_PER_DAY * 9))
                .count(),
            0
        );
    }

    #[test]
    fn take_chest_refuses_empty_tier() {
        let mut profile = PlayerProfile::new("p1", now());
        profile.chests.bronze = 1;
        assert_eq!(profile.take_chest(ChestTier::Bronze), Ok(()));
        assert_eq!(
            profile.take_chest(ChestTier::Bronze),
            Err(PlayerError::NoChest(ChestTier::Bronze))
        );
    }

    #[test]
    fn slot_refuses_mutation_until_loaded() {
        let mut slot = PlayerSlot::unloaded();
        assert!(slot.profile().is_none());
        assert_eq!(slot.mutate(|p| p.currency += 1), None);
        assert!(!slot.is_dirty());

        assert!(slot.install(PlayerProfile::new("p1", now())));
        slot.mutate(|p| p.currency += 5);
        assert!(slot.is_dirty());

        // A second install (late storage read) must not clobber memory.
        assert!(!slot.install(PlayerProfile::new("p1", now())));
        assert_eq!(slot.profile().unwrap().currency, 5);

        let flushed = slot.take_dirty().unwrap();
        assert_eq!(flushed.currency, 5);
        assert!(slot.take_dirty().is_none());
        slot.mark_dirty();
        assert!(slot.is_dirty());
    }
}
