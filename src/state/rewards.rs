//! Reward planning run at kill time: ranking, per-player XP/SP baseline, catch-up boost and
//! rank-bracket grants. Everything here is pure; committing the plan lives in
//! `services::reward_service`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::{AppConfig, BossDefinition, CatchUpConfig, ParticipationConfig, RewardConfig},
    dao::models::{BadgeGrantEntity, ChestCountsEntity, RewardBundleEntity},
    state::participation::ContributionRecord,
};

/// Chest rarity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChestTier {
    Wooden,
    Bronze,
    Silver,
    Gold,
}

/// Chest quantities per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChestBundle {
    #[serde(default)]
    pub gold: u32,
    #[serde(default)]
    pub silver: u32,
    #[serde(default)]
    pub bronze: u32,
    #[serde(default)]
    pub wooden: u32,
}

impl ChestBundle {
    pub fn total(&self) -> u32 {
        self.gold + self.silver + self.bronze + self.wooden
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn count(&self, tier: ChestTier) -> u32 {
        match tier {
            ChestTier::Wooden => self.wooden,
            ChestTier::Bronze => self.bronze,
            ChestTier::Silver => self.silver,
            ChestTier::Gold => self.gold,
        }
    }

    fn slot_mut(&mut self, tier: ChestTier) -> &mut u32 {
        match tier {
            ChestTier::Wooden => &mut self.wooden,
            ChestTier::Bronze => &mut self.bronze,
            ChestTier::Silver => &mut self.silver,
            ChestTier::Gold => &mut self.gold,
        }
    }

    /// Add every tier of `other`.
    pub fn add(&mut self, other: &ChestBundle) {
        self.gold = self.gold.saturating_add(other.gold);
        self.silver = self.silver.saturating_add(other.silver);
        self.bronze = self.bronze.saturating_add(other.bronze);
        self.wooden = self.wooden.saturating_add(other.wooden);
    }

    /// Remove one chest of `tier`; `false` when none is left.
    pub fn take(&mut self, tier: ChestTier) -> bool {
        let slot = self.slot_mut(tier);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }
}

/// Time-limited badge attached to a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BadgeGrant {
    pub id: String,
    pub duration_days: u32,
}

/// Everything one contributor receives from a kill besides XP/SP.
///
/// Every field is always present so a grant cannot silently lose a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RewardBundle {
    pub chests: ChestBundle,
    pub currency: Option<u64>,
    pub badge: Option<BadgeGrant>,
}

impl From<ChestBundle> for ChestCountsEntity {
    fn from(value: ChestBundle) -> Self {
        Self {
            gold: value.gold,
            silver: value.silver,
            bronze: value.bronze,
            wooden: value.wooden,
        }
    }
}

impl From<ChestCountsEntity> for ChestBundle {
    fn from(value: ChestCountsEntity) -> Self {
        Self {
            gold: value.gold,
            silver: value.silver,
            bronze: value.bronze,
            wooden: value.wooden,
        }
    }
}

impl From<RewardBundle> for RewardBundleEntity {
    fn from(value: RewardBundle) -> Self {
        Self {
            chests: value.chests.into(),
            currency: value.currency,
            badge: value.badge.map(|badge| BadgeGrantEntity {
                id: badge.id,
                duration_days: badge.duration_days,
            }),
        }
    }
}

impl From<RewardBundleEntity> for RewardBundle {
    fn from(value: RewardBundleEntity) -> Self {
        Self {
            chests: value.chests.into(),
            currency: value.currency,
            badge: value.badge.map(|badge| BadgeGrant {
                id: badge.id,
                duration_days: badge.duration_days,
            }),
        }
    }
}

/// A contributor's place on the final leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    /// 1-based position after sorting by damage.
    pub position: u32,
    pub player_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub damage: u64,
    pub damage_percent: f64,
    pub participation_score: u32,
    /// Dealt more than the negligible damage fraction.
    pub reward_eligible: bool,
}

/// Planned outcome for one contributor.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedReward {
    pub player_id: String,
    pub position: u32,
    /// `None` past the ranked limit.
    pub rank: Option<u32>,
    /// `None` for contributors below the negligible damage fraction.
    pub bundle: Option<RewardBundle>,
    pub xp: u64,
    pub sp: u64,
    pub catch_up_multiplier: f64,
}

/// Full distribution for one kill.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardPlan {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub total_damage: u64,
    pub standings: Vec<Standing>,
    pub rewards: Vec<PlannedReward>,
}

impl RewardPlan {
    /// Standing of the top damage dealer, if anyone contributed.
    pub fn top(&self) -> Option<&Standing> {
        self.standings.first()
    }

    /// Sum of chest quantities across every planned grant.
    pub fn total_chests(&self) -> ChestBundle {
        let mut total = ChestBundle::default();
        for reward in &self.rewards {
            if let Some(bundle) = &reward.bundle {
                total.add(&bundle.chests);
            }
        }
        total
    }
}

/// Sort records by damage, highest first. Ties keep first-contribution order.
pub fn rank_contributions<'a, I>(records: I) -> Vec<&'a ContributionRecord>
where
    I: IntoIterator<Item = &'a ContributionRecord>,
{
    let mut ranked: Vec<_> = records.into_iter().collect();
    ranked.sort_by(|a, b| b.damage.cmp(&a.damage));
    ranked
}

/// Share of total damage in percent; zero when nothing was dealt.
pub fn damage_percent(damage: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    damage as f64 * 100.0 / total as f64
}

/// `0.90 * min(PS / full, 1) + 0.10 * (PS / cap)`. Never looks at participant count.
pub fn participation_factor(score: u32, config: &ParticipationConfig) -> f64 {
    let full = config.full_participation_score.max(1) as f64;
    let cap = config.score_cap.max(1) as f64;
    let score = score.min(config.score_cap) as f64;
    0.90 * (score / full).min(1.0) + 0.10 * (score / cap)
}

/// Baseline award for a participation score.
pub fn baseline_award(baseline: u64, score: u32, config: &ParticipationConfig) -> u64 {
    (baseline as f64 * participation_factor(score, config)).floor() as u64
}

/// XP multiplier for players trailing the target-level curve.
pub fn catch_up_multiplier(level: u32, boss_index: u32, config: &CatchUpConfig) -> f64 {
    let gap = config.target_level(boss_index) - level as f64;
    if gap > config.gap_threshold {
        (1.0 + config.bonus_per_level * gap).min(config.max_multiplier)
    } else {
        1.0
    }
}

/// Whether a contribution clears the negligible damage fraction.
pub fn is_reward_eligible(damage: u64, total: u64, fraction: f64) -> bool {
    damage > 0 && damage as f64 > total as f64 * fraction
}

/// Bracket grant plus the flat base currency for a 1-based position.
pub fn bracket_bundle(position: u32, config: &RewardConfig) -> RewardBundle {
    let Some(bracket) = config.bracket_for(position) else {
        return RewardBundle {
            chests: ChestBundle::default(),
            currency: Some(config.base_currency).filter(|amount| *amount > 0),
            badge: None,
        };
    };

    let currency = bracket.currency.saturating_add(config.base_currency);
    RewardBundle {
        chests: bracket.chests,
        currency: Some(currency).filter(|amount| *amount > 0),
        badge: bracket.badge.as_ref().map(|badge| BadgeGrant {
            id: badge.id.clone(),
            duration_days: badge.duration_days,
        }),
    }
}

/// Plan the distribution for a kill.
///
/// `levels` maps player ids to their current level; unknown players count as level 1.
pub fn plan_rewards<'a, I>(
    encounter_id: Uuid,
    boss_index: u32,
    boss: &BossDefinition,
    records: I,
    levels: &HashMap<String, u32>,
    config: &AppConfig,
) -> RewardPlan
where
    I: IntoIterator<Item = &'a ContributionRecord>,
{
    let ranked = rank_contributions(records);
    let total_damage = ranked
        .iter()
        .fold(0u64, |total, record| total.saturating_add(record.damage));

    let mut standings = Vec::with_capacity(ranked.len());
    let mut rewards = Vec::with_capacity(ranked.len());

    for (index, record) in ranked.into_iter().enumerate() {
        let position = index as u32 + 1;
        let eligible = is_reward_eligible(
            record.damage,
            total_damage,
            config.rewards.negligible_damage_fraction,
        );

        standings.push(Standing {
            position,
            player_id: record.player_id.clone(),
            display_name: record.display_name.clone(),
            avatar: record.avatar.clone(),
            damage: record.damage,
            damage_percent: damage_percent(record.damage, total_damage),
            participation_score: record.participation_score,
            reward_eligible: eligible,
        });

        let level = levels.get(&record.player_id).copied().unwrap_or(1);
        let catch_up = catch_up_multiplier(level, boss_index, &config.catch_up);
        let xp = baseline_award(
            boss.xp_baseline,
            record.participation_score,
            &config.participation,
        );
        let sp = baseline_award(
            boss.sp_baseline,
            record.participation_score,
            &config.participation,
        );

        rewards.push(PlannedReward {
            player_id: record.player_id.clone(),
            position,
            rank: (position <= config.rewards.ranked_limit).then_some(position),
            bundle: eligible.then(|| bracket_bundle(position, &config.rewards)),
            xp: (xp as f64 * catch_up).floor() as u64,
            sp,
            catch_up_multiplier: catch_up,
        });
    }

    RewardPlan {
        encounter_id,
        boss_index,
        total_damage,
        standings,
        rewards,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        time::{Duration, SystemTime},
    };

    use super::*;

    fn record(id: &str, damage: u64, score: u32) -> ContributionRecord {
        ContributionRecord {
            player_id: id.into(),
            display_name: id.to_uppercase(),
            avatar: None,
            damage,
            eligible: score > 0,
            participation_score: score,
            active_time: Duration::from_secs(60),
            last_action_at: SystemTime::UNIX_EPOCH,
            last_ping_at: SystemTime::UNIX_EPOCH,
            last_damage_snapshot: 0,
            abilities_used: BTreeSet::new(),
        }
    }

    fn plan(records: &[ContributionRecord], boss_index: u32) -> RewardPlan {
        let config = AppConfig::default();
        plan_rewards(
            Uuid::nil(),
            boss_index,
            config.roster.definition(boss_index),
            records,
            &HashMap::new(),
            &config,
        )
    }

    #[test]
    fn three_player_kill_ranks_and_rewards() {
        let records = vec![
            record("carol", 50_000, 12),
            record("alice", 300_000, 12),
            record("bob", 150_000, 12),
        ];
        let plan = plan(&records, 1);

        assert_eq!(plan.total_damage, 500_000);
        let order: Vec<_> = plan.standings.iter().map(|s| s.player_id.as_str()).collect();
        assert_eq!(order, vec!["alice", "bob", "carol"]);
        let percents: Vec<_> = plan.standings.iter().map(|s| s.damage_percent).collect();
        assert_eq!(percents, vec![60.0, 30.0, 10.0]);

        let top = &plan.rewards[0];
        assert_eq!(top.rank, Some(1));
        let bundle = top.bundle.as_ref().unwrap();
        assert_eq!(
            bundle.chests,
            ChestBundle {
                gold: 1,
                silver: 2,
                bronze: 2,
                wooden: 2
            }
        );
        assert_eq!(
            bundle.badge,
            Some(BadgeGrant {
                id: "slayer".into(),
                duration_days: 7
            })
        );
        assert_eq!(bundle.currency, Some(600));
    }

    #[test]
    fn ties_keep_first_contribution_order() {
        let records = vec![record("first", 100, 1), record("second", 100, 1)];
        let plan = plan(&records, 1);
        assert_eq!(plan.standings[0].player_id, "first");
        assert_eq!(plan.standings[1].player_id, "second");
    }

    #[test]
    fn bracket_totals_for_150_players() {
        let records: Vec<_> = (0..150)
            .map(|i| record(&format!("p{i:03}"), 10_000 - i as u64, 6))
            .collect();
        let plan = plan(&records, 1);

        assert_eq!(plan.rewards.len(), 150);
        assert!(plan.rewards.iter().all(|reward| reward.bundle.is_some()));
        assert_eq!(
            plan.total_chests(),
            ChestBundle {
                gold: 3,
                silver: 26,
                bronze: 134,
                wooden: 300
            }
        );

        let last = &plan.rewards[149];
        assert_eq!(last.position, 150);
        assert_eq!(last.rank, None);
        assert_eq!(
            last.bundle.as_ref().unwrap().chests,
            ChestBundle {
                wooden: 2,
                ..ChestBundle::default()
            }
        );
        assert_eq!(plan.rewards[99].rank, Some(100));
    }

    #[test]
    fn xp_is_population_invariant() {
        let small = vec![record("me", 500, 10), record("x", 400, 10)];
        let mut large = vec![record("me", 500, 10)];
        large.extend((0..499).map(|i| record(&format!("o{i}"), 400, 10)));

        let small_plan = plan(&small, 2);
        let large_plan = plan(&large, 2);
        let xp_small = small_plan.rewards.iter().find(|r| r.player_id == "me").unwrap().xp;
        let xp_large = large_plan.rewards.iter().find(|r| r.player_id == "me").unwrap().xp;
        assert!(xp_small > 0);
        assert_eq!(xp_small, xp_large);
    }

    #[test]
    fn participation_factor_weights() {
        let config = ParticipationConfig::default();
        assert_eq!(participation_factor(0, &config), 0.0);
        // Full participation (12) with half the cap: 0.9 + 0.05.
        assert!((participation_factor(12, &config) - 0.95).abs() < 1e-12);
        assert!((participation_factor(24, &config) - 1.0).abs() < 1e-12);
        assert!((participation_factor(99, &config) - 1.0).abs() < 1e-12);
        assert!((participation_factor(6, &config) - (0.45 + 0.025)).abs() < 1e-12);
    }

    #[test]
    fn catch_up_boosts_trailing_players_only() {
        let config = CatchUpConfig::default();
        assert_eq!(catch_up_multiplier(28, 10, &config), 1.0);
        assert_eq!(catch_up_multiplier(27, 10, &config), 1.75);
        assert_eq!(catch_up_multiplier(1, 10, &config), 3.0);
        assert_eq!(catch_up_multiplier(40, 10, &config), 1.0);
    }

    #[test]
    fn catch_up_scales_xp_but_not_sp() {
        let config = AppConfig::default();
        let records = vec![record("late", 100, 24)];
        let levels = HashMap::from([("late".to_string(), 1)]);
        let boss_index = 10;
        let boss = config.roster.definition(boss_index);
        let plan = plan_rewards(Uuid::nil(), boss_index, boss, &records, &levels, &config);

        let reward = &plan.rewards[0];
        assert_eq!(reward.catch_up_multiplier, 3.0);
        assert_eq!(reward.xp, boss.xp_baseline * 3);
        assert_eq!(reward.sp, boss.sp_baseline);
    }

    #[test]
    fn negligible_contributors_get_no_bundle() {
        let records = vec![record("whale", 1_000_000, 5), record("tapper", 1, 5)];
        let plan = plan(&records, 1);
        assert!(plan.rewards[0].bundle.is_some());
        assert!(plan.rewards[1].bundle.is_none());
        assert!(!plan.standings[1].reward_eligible);
    }

    #[test]
    fn empty_encounter_plans_nothing() {
        let plan = plan(&[], 1);
        assert_eq!(plan.total_damage, 0);
        assert!(plan.standings.is_empty());
        assert!(plan.top().is_none());
        assert_eq!(damage_percent(0, 0), 0.0);
    }
}
