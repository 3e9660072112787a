//! Load-time configuration: boss roster, dampening and participation tuning, reward tables and
//! runtime intervals. Nothing here is hot-reloaded.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::state::rewards::{ChestBundle, ChestTier};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WORLD_BOSS_CONFIG_PATH";

/// Returned by [`BossRoster::definition`] if the roster was somehow emptied after validation.
static FALLBACK_BOSS: BossDefinition = BossDefinition {
    name: String::new(),
    title: String::new(),
    max_health: 1_000_000,
    thorns: 0,
    xp_baseline: 0,
    sp_baseline: 0,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub encounter: EncounterConfig,
    pub dampening: DampeningConfig,
    pub participation: ParticipationConfig,
    pub roster: BossRoster,
    pub rewards: RewardConfig,
    pub catch_up: CatchUpConfig,
    pub leveling: LevelingConfig,
    pub abilities: Vec<AbilityDefinition>,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        info!(
                            path = %path.display(),
                            bosses = config.roster.total_bosses,
                            brackets = config.rewards.brackets.len(),
                            "loaded encounter configuration"
                        );
                        config
                    }
                    Err(reason) => {
                        warn!(
                            path = %path.display(),
                            reason,
                            "config rejected; falling back to defaults"
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let d = &self.dampening;
        if !(d.alpha > 0.0 && d.alpha <= 1.0) {
            return Err(format!("dampening alpha must be in (0, 1], got {}", d.alpha));
        }
        if !(d.min_multiplier > 0.0 && d.min_multiplier <= d.max_multiplier) {
            return Err(format!(
                "dampening multipliers must satisfy 0 < min <= max (got {} / {})",
                d.min_multiplier, d.max_multiplier
            ));
        }
        if self.roster.bosses.is_empty() || self.roster.total_bosses == 0 {
            return Err("roster must define at least one boss".into());
        }
        if self.roster.bosses.iter().any(|boss| boss.max_health == 0) {
            return Err("boss max health must be strictly positive".into());
        }
        let p = &self.participation;
        if p.score_cap == 0 || p.full_participation_score == 0 {
            return Err("participation cap and full threshold must be positive".into());
        }
        if self.leveling.xp_per_level == 0 || self.leveling.max_level == 0 {
            return Err("leveling parameters must be positive".into());
        }
        self.rewards.validate_brackets()?;
        self.catch_up.validate_curve()?;
        Ok(())
    }

    /// Look up a special ability by identifier.
    pub fn ability(&self, id: &str) -> Option<&AbilityDefinition> {
        self.abilities.iter().find(|ability| ability.id == id)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encounter: EncounterConfig::default(),
            dampening: DampeningConfig::default(),
            participation: ParticipationConfig::default(),
            roster: BossRoster::default(),
            rewards: RewardConfig::default(),
            catch_up: CatchUpConfig::default(),
            leveling: LevelingConfig::default(),
            abilities: default_abilities(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Lifecycle constants of a single boss encounter.
pub struct EncounterConfig {
    /// Minimum lifetime of an encounter; the dampening controller paces damage against it.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "min_duration_secs")]
    pub min_duration: Duration,
    /// Delay between a kill and the next spawn.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "respawn_delay_secs")]
    pub respawn_delay: Duration,
    /// Largest raw amount a single hit may carry before it is rejected as malformed.
    pub max_raw_hit: u64,
    /// Upper bound on the number of hits in one damage batch.
    pub max_batch_size: usize,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(24 * 60 * 60),
            respawn_delay: Duration::from_secs(300),
            max_raw_hit: 1_000_000,
            max_batch_size: 50,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Tuning of the throughput-driven damage multiplier.
pub struct DampeningConfig {
    /// EMA smoothing factor applied on every sample.
    pub alpha: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "sample_interval_secs")]
    pub sample_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "recompute_interval_secs")]
    pub recompute_interval: Duration,
}

impl Default for DampeningConfig {
    fn default() -> Self {
        Self {
            alpha: 0.10,
            min_multiplier: 0.15,
            max_multiplier: 1.0,
            sample_interval: Duration::from_secs(60),
            recompute_interval: Duration::from_secs(300),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Participation Score accrual rules.
pub struct ParticipationConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "tick_interval_secs")]
    pub tick_interval: Duration,
    /// Hard cap on the score one player can reach during an encounter.
    pub score_cap: u32,
    /// Score at which the "meaningful participation" part of the XP formula saturates.
    pub full_participation_score: u32,
    /// A player must have acted within this window to accrue on a tick.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "activity_window_secs")]
    pub activity_window: Duration,
    /// Cumulative active time needed before a player starts accruing.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "eligibility_threshold_secs")]
    pub eligibility_threshold: Duration,
    /// Largest delta credited by a single liveness ping.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "max_ping_delta_secs")]
    pub max_ping_delta: Duration,
}

impl Default for ParticipationConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(300),
            score_cap: 24,
            full_participation_score: 12,
            activity_window: Duration::from_secs(300),
            eligibility_threshold: Duration::from_secs(30),
            max_ping_delta: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Static description of one boss in the roster.
pub struct BossDefinition {
    pub name: String,
    pub title: String,
    pub max_health: u64,
    /// Base retaliation dealt back to attackers, scaled by the rage phase.
    pub thorns: u64,
    /// Per-player XP awarded at full participation (never divided by participant count).
    pub xp_baseline: u64,
    /// Per-player skill points awarded at full participation.
    pub sp_baseline: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Ordered boss roster; encounter indices are 1-based.
pub struct BossRoster {
    /// Number of encounters before the event finishes.
    pub total_bosses: u32,
    pub bosses: Vec<BossDefinition>,
}

impl BossRoster {
    /// Definition for a 1-based boss index, reusing the last entry past the end of the list.
    pub fn definition(&self, index: u32) -> &BossDefinition {
        let position = index.saturating_sub(1) as usize;
        self.bosses
            .get(position)
            .or_else(|| self.bosses.last())
            .unwrap_or(&FALLBACK_BOSS)
    }
}

impl Default for BossRoster {
    fn default() -> Self {
        const NAMES: [(&str, &str); 10] = [
            ("Gravemaw", "The Hungering Deep"),
            ("Ashen Colossus", "Warden of Cinders"),
            ("Vel'Kora", "Queen of the Drowned Spire"),
            ("Thornback Behemoth", "Bramble Tyrant"),
            ("Sable Wyrm", "Devourer of Lanterns"),
            ("The Hollow King", "Crown Without a Head"),
            ("Mirefang", "Plague of the Lowlands"),
            ("Aurelion", "The Gilded Ruin"),
            ("Nyx Sovereign", "Herald of the Long Night"),
            ("Worldbreaker", "End of All Roads"),
        ];

        let bosses = NAMES
            .iter()
            .enumerate()
            .map(|(i, (name, title))| {
                let tier = i as u64 + 1;
                BossDefinition {
                    name: (*name).to_string(),
                    title: (*title).to_string(),
                    max_health: 5_000_000 * tier,
                    thorns: 25 * tier,
                    xp_baseline: 1_200 + 600 * (tier - 1),
                    sp_baseline: 2 + (tier - 1),
                }
            })
            .collect::<Vec<_>>();

        Self {
            total_bosses: bosses.len() as u32,
            bosses,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Badge handed out by a rank bracket.
pub struct BadgeSpec {
    pub id: String,
    pub duration_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
/// One row of the rank-bracket reward table. Ranks are 1-based and inclusive.
pub struct RewardBracket {
    pub min_rank: u32,
    /// `None` means "and everybody below".
    pub max_rank: Option<u32>,
    pub chests: ChestBundle,
    pub currency: u64,
    #[serde(default)]
    pub badge: Option<BadgeSpec>,
}

impl RewardBracket {
    fn contains(&self, rank: u32) -> bool {
        rank >= self.min_rank && self.max_rank.is_none_or(|max| rank <= max)
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Currency range rolled when a chest of the given tier is opened.
pub struct ChestPayout {
    pub tier: ChestTier,
    pub min_currency: u64,
    pub max_currency: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Reward distribution tables.
pub struct RewardConfig {
    pub brackets: Vec<RewardBracket>,
    /// Flat currency for every eligible contributor regardless of rank.
    pub base_currency: u64,
    /// Contributors at or below this share of total damage receive no chest/currency grant.
    pub negligible_damage_fraction: f64,
    /// Ranks beyond this position are stored as `null` on the grant.
    pub ranked_limit: u32,
    pub chest_payouts: Vec<ChestPayout>,
}

impl RewardConfig {
    /// Bracket covering a 1-based rank position.
    pub fn bracket_for(&self, rank: u32) -> Option<&RewardBracket> {
        self.brackets.iter().find(|bracket| bracket.contains(rank))
    }

    /// Currency range rolled for a chest tier.
    pub fn payout_for(&self, tier: ChestTier) -> Option<&ChestPayout> {
        self.chest_payouts.iter().find(|payout| payout.tier == tier)
    }

    fn validate_brackets(&self) -> Result<(), String> {
        let mut expected = 1;
        for bracket in &self.brackets {
            if bracket.min_rank != expected {
                return Err(format!(
                    "reward brackets must be contiguous (expected rank {expected}, got {})",
                    bracket.min_rank
                ));
            }
            match bracket.max_rank {
                Some(max) if max < bracket.min_rank => {
                    return Err(format!("bracket starting at {expected} ends before it starts"));
                }
                Some(max) => expected = max + 1,
                None => return Ok(()),
            }
        }
        Err("the last reward bracket must be open-ended".into())
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        let bracket = |min_rank, max_rank, gold, silver, bronze, wooden, currency, badge| {
            RewardBracket {
                min_rank,
                max_rank,
                chests: ChestBundle {
                    gold,
                    silver,
                    bronze,
                    wooden,
                },
                currency,
                badge,
            }
        };
        let badge = |id: &str, duration_days| {
            Some(BadgeSpec {
                id: id.to_string(),
                duration_days,
            })
        };

        Self {
            brackets: vec![
                bracket(1, Some(1), 1, 2, 2, 2, 500, badge("slayer", 7)),
                bracket(2, Some(2), 1, 1, 2, 2, 350, badge("vanquisher", 3)),
                bracket(3, Some(3), 1, 1, 1, 2, 250, badge("champion", 3)),
                bracket(4, Some(10), 0, 1, 2, 2, 150, None),
                bracket(11, Some(25), 0, 1, 1, 2, 100, None),
                bracket(26, Some(50), 0, 0, 2, 2, 75, None),
                bracket(51, Some(100), 0, 0, 1, 2, 50, None),
                bracket(101, None, 0, 0, 0, 2, 25, None),
            ],
            base_currency: 100,
            negligible_damage_fraction: 0.0005,
            ranked_limit: 100,
            chest_payouts: vec![
                ChestPayout {
                    tier: ChestTier::Wooden,
                    min_currency: 5,
                    max_currency: 15,
                },
                ChestPayout {
                    tier: ChestTier::Bronze,
                    min_currency: 15,
                    max_currency: 40,
                },
                ChestPayout {
                    tier: ChestTier::Silver,
                    min_currency: 40,
                    max_currency: 100,
                },
                ChestPayout {
                    tier: ChestTier::Gold,
                    min_currency: 100,
                    max_currency: 250,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
/// Point of the target-level curve keyed by boss index.
pub struct CurvePoint {
    pub boss_index: u32,
    pub level: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Mentor boost applied to players trailing the expected level for a boss index.
pub struct CatchUpConfig {
    pub target_curve: Vec<CurvePoint>,
    /// A player must trail by more than this many levels to be boosted.
    pub gap_threshold: f64,
    pub bonus_per_level: f64,
    pub max_multiplier: f64,
}

impl CatchUpConfig {
    fn validate_curve(&self) -> Result<(), String> {
        if self.target_curve.is_empty() {
            return Err("catch-up target curve must have at least one point".into());
        }
        if let Some(pair) = self
            .target_curve
            .windows(2)
            .find(|pair| pair[1].boss_index <= pair[0].boss_index)
        {
            return Err(format!(
                "catch-up curve boss indices must strictly increase (got {} after {})",
                pair[1].boss_index, pair[0].boss_index
            ));
        }
        Ok(())
    }

    /// Expected level at `boss_index`, linearly interpolated between curve points and clamped
    /// to the first/last point outside the curve.
    pub fn target_level(&self, boss_index: u32) -> f64 {
        let x = boss_index as f64;
        let Some(first) = self.target_curve.first() else {
            return 1.0;
        };
        if x <= first.boss_index as f64 {
            return first.level;
        }
        for pair in self.target_curve.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if x <= hi.boss_index as f64 {
                let span = hi.boss_index.saturating_sub(lo.boss_index) as f64;
                if span <= 0.0 {
                    return hi.level;
                }
                let t = (x - lo.boss_index as f64) / span;
                return lo.level + (hi.level - lo.level) * t;
            }
        }
        self.target_curve.last().map_or(first.level, |last| last.level)
    }
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            target_curve: vec![
                CurvePoint {
                    boss_index: 1,
                    level: 1.0,
                },
                CurvePoint {
                    boss_index: 3,
                    level: 8.0,
                },
                CurvePoint {
                    boss_index: 6,
                    level: 18.0,
                },
                CurvePoint {
                    boss_index: 10,
                    level: 30.0,
                },
            ],
            gap_threshold: 2.0,
            bonus_per_level: 0.25,
            max_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Level progression curve.
pub struct LevelingConfig {
    /// XP needed to go from level `n` to `n + 1` is `xp_per_level * n`.
    pub xp_per_level: u64,
    pub max_level: u32,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            xp_per_level: 1_000,
            max_level: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Special ability players can cast against the boss.
pub struct AbilityDefinition {
    pub id: String,
    /// Raw damage before dampening.
    pub damage: u64,
    pub sp_cost: u64,
    pub unlock_level: u32,
}

fn default_abilities() -> Vec<AbilityDefinition> {
    vec![
        AbilityDefinition {
            id: "cleave".into(),
            damage: 2_500,
            sp_cost: 1,
            unlock_level: 3,
        },
        AbilityDefinition {
            id: "meteor".into(),
            damage: 8_000,
            sp_cost: 3,
            unlock_level: 6,
        },
        AbilityDefinition {
            id: "execute".into(),
            damage: 20_000,
            sp_cost: 6,
            unlock_level: 10,
        },
    ]
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Background task cadence and coordination limits.
pub struct RuntimeConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "broadcast_interval_ms")]
    pub broadcast_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "respawn_check_interval_ms")]
    pub respawn_check_interval: Duration,
    /// Bursts of encounter mutations are coalesced into one write per window.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "persist_debounce_ms")]
    pub persist_debounce: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "snapshot_interval_secs")]
    pub snapshot_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "profile_flush_interval_secs")]
    pub profile_flush_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "claim_lock_ttl_secs")]
    pub claim_lock_ttl: Duration,
    /// Capacity of the coordinator command queue.
    pub command_queue: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(250),
            respawn_check_interval: Duration::from_millis(1_000),
            persist_debounce: Duration::from_millis(500),
            snapshot_interval: Duration::from_secs(5),
            profile_flush_interval: Duration::from_secs(10),
            claim_lock_ttl: Duration::from_secs(10),
            command_queue: 1_024,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn brackets_cover_every_rank() {
        let rewards = RewardConfig::default();
        for rank in 1..=500 {
            assert!(rewards.bracket_for(rank).is_some(), "rank {rank} uncovered");
        }
        let first = rewards.bracket_for(1).unwrap();
        assert_eq!(first.badge.as_ref().map(|b| b.id.as_str()), Some("slayer"));
    }

    #[test]
    fn gap_in_brackets_is_rejected() {
        let mut rewards = RewardConfig::default();
        rewards.brackets.remove(3);
        assert!(rewards.validate_brackets().is_err());
    }

    #[test]
    fn unordered_catch_up_curve_is_rejected() {
        let mut config = AppConfig::default();
        config.catch_up.target_curve.swap(1, 2);
        let err = config.validate().unwrap_err();
        assert!(err.contains("strictly increase"), "{err}");

        config.catch_up.target_curve = vec![
            CurvePoint { boss_index: 2, level: 5.0 },
            CurvePoint { boss_index: 2, level: 9.0 },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn target_level_survives_an_unvalidated_curve() {
        let catch_up = CatchUpConfig {
            target_curve: vec![
                CurvePoint { boss_index: 5, level: 10.0 },
                CurvePoint { boss_index: 2, level: 4.0 },
            ],
            ..CatchUpConfig::default()
        };
        assert_eq!(catch_up.target_level(1), 10.0);
        assert_eq!(catch_up.target_level(9), 4.0);
    }

    #[test]
    fn target_level_interpolates_between_points() {
        let catch_up = CatchUpConfig::default();
        assert_eq!(catch_up.target_level(1), 1.0);
        assert_eq!(catch_up.target_level(2), 4.5);
        assert_eq!(catch_up.target_level(3), 8.0);
        assert_eq!(catch_up.target_level(10), 30.0);
        assert_eq!(catch_up.target_level(42), 30.0);
    }

    #[test]
    fn roster_reuses_last_definition() {
        let roster = BossRoster {
            total_bosses: 5,
            bosses: BossRoster::default().bosses.into_iter().take(2).collect(),
        };
        assert_eq!(roster.definition(1).name, "Gravemaw");
        assert_eq!(roster.definition(2).name, "Ashen Colossus");
        assert_eq!(roster.definition(5).name, "Ashen Colossus");
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "dampening": { "alpha": 0.2 }, "encounter": { "min_duration_secs": 3600 } }"#,
        )
        .unwrap();
        assert_eq!(config.dampening.alpha, 0.2);
        assert_eq!(config.dampening.min_multiplier, 0.15);
        assert_eq!(config.encounter.min_duration, Duration::from_secs(3600));
        assert_eq!(config.abilities.len(), 3);
    }
}
