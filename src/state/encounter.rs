use std::time::{Duration, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{AppConfig, BossDefinition, DampeningConfig},
    dao::models::EncounterPhaseEntity,
    state::dampening::DampeningState,
};

/// Lifecycle of the boss slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterPhase {
    /// The boss can be damaged.
    Alive,
    /// The boss is dead and the next spawn is scheduled.
    Respawning {
        /// When the final blow landed.
        killed_at: SystemTime,
        /// When the respawn check is allowed to spawn the next boss.
        respawn_at: SystemTime,
    },
    /// Every boss of the roster has been defeated; nothing spawns anymore.
    Finished {
        /// When the last respawn attempt found the roster exhausted.
        finished_at: SystemTime,
    },
}

impl From<EncounterPhase> for EncounterPhaseEntity {
    fn from(value: EncounterPhase) -> Self {
        match value {
            EncounterPhase::Alive => EncounterPhaseEntity::Alive,
            EncounterPhase::Respawning {
                killed_at,
                respawn_at,
            } => EncounterPhaseEntity::Respawning {
                killed_at,
                respawn_at,
            },
            EncounterPhase::Finished { finished_at } => {
                EncounterPhaseEntity::Finished { finished_at }
            }
        }
    }
}

impl From<EncounterPhaseEntity> for EncounterPhase {
    fn from(value: EncounterPhaseEntity) -> Self {
        match value {
            EncounterPhaseEntity::Alive => EncounterPhase::Alive,
            EncounterPhaseEntity::Respawning {
                killed_at,
                respawn_at,
            } => EncounterPhase::Respawning {
                killed_at,
                respawn_at,
            },
            EncounterPhaseEntity::Finished { finished_at } => {
                EncounterPhase::Finished { finished_at }
            }
        }
    }
}

/// Rage tier derived from the remaining health percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RagePhase {
    /// Above 75% health.
    Calm,
    /// 75% or less.
    Agitated,
    /// 50% or less.
    Enraged,
    /// 25% or less.
    Berserk,
}

impl RagePhase {
    /// Tier for the given health, using integer comparisons so rounding never skips a tier.
    pub fn from_health(current: u64, max: u64) -> Self {
        let current = current as u128 * 100;
        let max = max as u128;
        if current <= max * 25 {
            RagePhase::Berserk
        } else if current <= max * 50 {
            RagePhase::Enraged
        } else if current <= max * 75 {
            RagePhase::Agitated
        } else {
            RagePhase::Calm
        }
    }

    /// Multiplier applied to the boss's outgoing damage.
    pub fn multiplier(self) -> f64 {
        match self {
            RagePhase::Calm => 1.0,
            RagePhase::Agitated => 1.2,
            RagePhase::Enraged => 1.5,
            RagePhase::Berserk => 2.0,
        }
    }

    /// Stable lowercase label used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            RagePhase::Calm => "calm",
            RagePhase::Agitated => "agitated",
            RagePhase::Enraged => "enraged",
            RagePhase::Berserk => "berserk",
        }
    }

    /// Inverse of [`RagePhase::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "calm" => Some(RagePhase::Calm),
            "agitated" => Some(RagePhase::Agitated),
            "enraged" => Some(RagePhase::Enraged),
            "berserk" => Some(RagePhase::Berserk),
            _ => None,
        }
    }
}

/// Result of applying one raw hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageApplication {
    /// The hit landed.
    Applied {
        /// Damage after dampening and clamping to remaining health.
        applied: u64,
        /// Scaled damage that exceeded the remaining health and was dropped.
        overflow: u64,
        /// `true` only for the hit that brought health from above zero to zero.
        killed: bool,
    },
    /// The boss was not alive; the hit is a no-op.
    Ignored,
}

impl DamageApplication {
    /// Damage that actually reduced health.
    pub fn applied(&self) -> u64 {
        match self {
            DamageApplication::Applied { applied, .. } => *applied,
            DamageApplication::Ignored => 0,
        }
    }

    /// Whether this hit was the final blow.
    pub fn is_kill(&self) -> bool {
        matches!(self, DamageApplication::Applied { killed: true, .. })
    }
}

/// What `respawn` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespawnOutcome {
    /// A fresh encounter replaced the previous one.
    Spawned {
        /// 1-based roster index of the new boss.
        boss_index: u32,
    },
    /// The roster is exhausted; no further spawns.
    Finished,
}

/// Who asked for the respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnTrigger {
    /// The periodic respawn check; only valid once the delay elapsed.
    Timer,
    /// An operator forcing a respawn.
    Admin,
}

/// Errors raised by encounter transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncounterError {
    /// The encounter is not waiting for a respawn.
    #[error("encounter is not respawning")]
    NotRespawning,
    /// The respawn delay has not elapsed yet.
    #[error("respawn not due for another {0:?}")]
    RespawnNotDue(Duration),
    /// The roster has been exhausted.
    #[error("encounter series is finished")]
    Finished,
    /// Kill resolution was requested twice for the same encounter.
    #[error("kill resolution already ran for encounter `{0}`")]
    KillAlreadyResolved(Uuid),
    /// Kill resolution requested while the boss still has health.
    #[error("kill resolution requested while boss `{0}` is alive")]
    NotKilled(Uuid),
}

/// Authoritative state of the active boss. Owned by the coordinator only.
#[derive(Debug, Clone)]
pub struct BossEncounter {
    /// Unique identifier of this spawn; grants and history rows are keyed by it.
    pub id: Uuid,
    /// 1-based roster index.
    pub boss_index: u32,
    /// Display name copied from the roster entry.
    pub name: String,
    /// Subtitle shown under the name.
    pub title: String,
    /// Health at spawn, after any scaling.
    pub max_health: u64,
    current_health: u64,
    rage: RagePhase,
    thorns: u64,
    /// Spawn time.
    pub started_at: SystemTime,
    /// `started_at + min_duration`; the dampening controller paces damage against it.
    pub target_end_at: SystemTime,
    /// Damage multiplier controller state.
    pub dampening: DampeningState,
    cumulative_damage: u64,
    phase: EncounterPhase,
    kill_resolved: bool,
}

impl BossEncounter {
    /// Spawn a fresh encounter for the given roster entry.
    pub fn spawn(boss_index: u32, boss: &BossDefinition, config: &AppConfig, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            boss_index,
            name: boss.name.clone(),
            title: boss.title.clone(),
            max_health: boss.max_health,
            current_health: boss.max_health,
            rage: RagePhase::Calm,
            thorns: boss.thorns,
            started_at: now,
            target_end_at: now + config.encounter.min_duration,
            dampening: DampeningState::new(now, &config.dampening),
            cumulative_damage: 0,
            phase: EncounterPhase::Alive,
            kill_resolved: false,
        }
    }

    /// Rebuild an encounter from persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        boss_index: u32,
        boss: &BossDefinition,
        max_health: u64,
        current_health: u64,
        cumulative_damage: u64,
        started_at: SystemTime,
        target_end_at: SystemTime,
        dampening: DampeningState,
        phase: EncounterPhase,
        kill_resolved: bool,
    ) -> Self {
        let current_health = current_health.min(max_health);
        Self {
            id,
            boss_index,
            name: boss.name.clone(),
            title: boss.title.clone(),
            max_health,
            current_health,
            rage: RagePhase::from_health(current_health, max_health),
            thorns: boss.thorns,
            started_at,
            target_end_at,
            dampening,
            cumulative_damage,
            phase,
            kill_resolved,
        }
    }

    /// Health left; never exceeds `max_health`.
    pub fn current_health(&self) -> u64 {
        self.current_health
    }

    /// Damage applied since spawn, after dampening.
    pub fn cumulative_damage(&self) -> u64 {
        self.cumulative_damage
    }

    /// Rage phase derived from the remaining health.
    pub fn rage(&self) -> RagePhase {
        self.rage
    }

    /// Retaliation damage per hit.
    pub fn thorns(&self) -> u64 {
        self.thorns
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> EncounterPhase {
        self.phase
    }

    /// True until the killing blow lands.
    pub fn is_alive(&self) -> bool {
        matches!(self.phase, EncounterPhase::Alive)
    }

    /// Set once rewards for this kill have been distributed.
    pub fn kill_resolved(&self) -> bool {
        self.kill_resolved
    }

    /// Remaining health as a percentage, for display only.
    pub fn health_percent(&self) -> f64 {
        if self.max_health == 0 {
            return 0.0;
        }
        self.current_health as f64 * 100.0 / self.max_health as f64
    }

    /// Outgoing retaliation for one attack at the current rage tier.
    pub fn retaliation(&self) -> u64 {
        (self.thorns as f64 * self.rage.multiplier()).floor() as u64
    }

    /// Apply one raw hit. The dampening multiplier scales it, the result is clamped to the
    /// remaining health, and the hit that reaches zero flips the phase to respawning.
    pub fn apply_damage(
        &mut self,
        raw: u64,
        now: SystemTime,
        respawn_delay: Duration,
    ) -> DamageApplication {
        if !self.is_alive() || self.current_health == 0 {
            return DamageApplication::Ignored;
        }

        let scaled = (raw as f64 * self.dampening.multiplier).floor() as u64;
        let applied = scaled.min(self.current_health);
        let overflow = scaled - applied;

        self.current_health -= applied;
        self.cumulative_damage = self.cumulative_damage.saturating_add(applied);
        self.rage = RagePhase::from_health(self.current_health, self.max_health);

        let killed = self.current_health == 0;
        if killed {
            self.phase = EncounterPhase::Respawning {
                killed_at: now,
                respawn_at: now + respawn_delay,
            };
        }

        DamageApplication::Applied {
            applied,
            overflow,
            killed,
        }
    }

    /// Claim the right to run kill resolution. Succeeds at most once per encounter.
    pub fn begin_kill_resolution(&mut self) -> Result<(), EncounterError> {
        if self.current_health > 0 {
            return Err(EncounterError::NotKilled(self.id));
        }
        if self.kill_resolved {
            return Err(EncounterError::KillAlreadyResolved(self.id));
        }
        self.kill_resolved = true;
        Ok(())
    }

    /// Sample throughput for the dampening controller.
    pub fn sample_throughput(&mut self, now: SystemTime, alpha: f64) -> Option<f64> {
        if !self.is_alive() {
            return None;
        }
        self.dampening.sample(self.cumulative_damage, now, alpha)
    }

    /// Recompute the dampening multiplier from the smoothed throughput.
    pub fn recompute_multiplier(
        &mut self,
        now: SystemTime,
        config: &DampeningConfig,
    ) -> Option<f64> {
        if !self.is_alive() {
            return None;
        }
        Some(
            self.dampening
                .recompute(self.current_health, now, self.target_end_at, config),
        )
    }

    /// Replace this encounter with the next (or the same) roster entry.
    ///
    /// Past the configured boss count the phase becomes [`EncounterPhase::Finished`] and
    /// [`RespawnOutcome::Finished`] is returned.
    pub fn respawn(
        &mut self,
        advance: bool,
        trigger: RespawnTrigger,
        config: &AppConfig,
        now: SystemTime,
    ) -> Result<RespawnOutcome, EncounterError> {
        match (self.phase, trigger) {
            (EncounterPhase::Finished { .. }, _) => return Err(EncounterError::Finished),
            (EncounterPhase::Alive, RespawnTrigger::Timer) => {
                return Err(EncounterError::NotRespawning);
            }
            (EncounterPhase::Respawning { respawn_at, .. }, RespawnTrigger::Timer) => {
                if let Ok(remaining) = respawn_at.duration_since(now) {
                    if !remaining.is_zero() {
                        return Err(EncounterError::RespawnNotDue(remaining));
                    }
                }
            }
            (_, RespawnTrigger::Admin) => {}
        }

        let next_index = if advance {
            self.boss_index + 1
        } else {
            self.boss_index
        };

        if next_index > config.roster.total_bosses {
            self.phase = EncounterPhase::Finished { finished_at: now };
            return Ok(RespawnOutcome::Finished);
        }

        *self = BossEncounter::spawn(next_index, config.roster.definition(next_index), config, now);
        Ok(RespawnOutcome::Spawned {
            boss_index: next_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BossRoster;

    fn config_with_health(max_health: u64, total: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.roster = BossRoster {
            total_bosses: total,
            bosses: vec![BossDefinition {
                name: "Test Golem".into(),
                title: "Of Unit Tests".into(),
                max_health,
                thorns: 10,
                xp_baseline: 1_000,
                sp_baseline: 2,
            }],
        };
        config
    }

    fn spawn(max_health: u64) -> (BossEncounter, AppConfig) {
        let config = config_with_health(max_health, 3);
        let encounter =
            BossEncounter::spawn(1, config.roster.definition(1), &config, SystemTime::now());
        (encounter, config)
    }

    const DELAY: Duration = Duration::from_secs(300);

    #[test]
    fn health_is_monotonic_and_never_negative() {
        let (mut encounter, _) = spawn(10_000);
        let now = SystemTime::now();
        let mut previous = encounter.current_health();
        for raw in [0, 1, 999, 3_000, 50, 7_777, 123_456, 5, 5] {
            encounter.apply_damage(raw, now, DELAY);
            assert!(encounter.current_health() <= previous);
            previous = encounter.current_health();
        }
        assert_eq!(encounter.current_health(), 0);
        assert_eq!(encounter.cumulative_damage(), 10_000);
    }

    #[test]
    fn kill_happens_on_the_crossing_hit_only() {
        let (mut encounter, _) = spawn(1_000);
        let now = SystemTime::now();

        let first = encounter.apply_damage(600, now, DELAY);
        assert!(!first.is_kill());

        let second = encounter.apply_damage(600, now, DELAY);
        assert_eq!(
            second,
            DamageApplication::Applied {
                applied: 400,
                overflow: 200,
                killed: true
            }
        );
        assert!(matches!(encounter.phase(), EncounterPhase::Respawning { .. }));

        let third = encounter.apply_damage(600, now, DELAY);
        assert_eq!(third, DamageApplication::Ignored);
        assert_eq!(encounter.cumulative_damage(), 1_000);
    }

    #[test]
    fn dampening_multiplier_floors_damage() {
        let (mut encounter, _) = spawn(1_000_000);
        encounter.dampening.multiplier = 0.15;
        let applied = encounter.apply_damage(999, SystemTime::now(), DELAY);
        assert_eq!(applied.applied(), 149);
    }

    #[test]
    fn rage_tiers_follow_health_thresholds() {
        assert_eq!(RagePhase::from_health(100, 100), RagePhase::Calm);
        assert_eq!(RagePhase::from_health(76, 100), RagePhase::Calm);
        assert_eq!(RagePhase::from_health(75, 100), RagePhase::Agitated);
        assert_eq!(RagePhase::from_health(50, 100), RagePhase::Enraged);
        assert_eq!(RagePhase::from_health(25, 100), RagePhase::Berserk);
        assert_eq!(RagePhase::from_health(0, 100), RagePhase::Berserk);
    }

    #[test]
    fn rage_scales_retaliation_not_incoming_damage() {
        let (mut encounter, _) = spawn(1_000);
        assert_eq!(encounter.retaliation(), 10);
        let hit = encounter.apply_damage(800, SystemTime::now(), DELAY);
        assert_eq!(hit.applied(), 800);
        assert_eq!(encounter.rage(), RagePhase::Berserk);
        assert_eq!(encounter.retaliation(), 20);
    }

    #[test]
    fn kill_resolution_is_claimed_once() {
        let (mut encounter, _) = spawn(10);
        assert_eq!(
            encounter.begin_kill_resolution(),
            Err(EncounterError::NotKilled(encounter.id))
        );
        encounter.apply_damage(10, SystemTime::now(), DELAY);
        assert_eq!(encounter.begin_kill_resolution(), Ok(()));
        assert_eq!(
            encounter.begin_kill_resolution(),
            Err(EncounterError::KillAlreadyResolved(encounter.id))
        );
    }

    #[test]
    fn timer_respawn_waits_for_delay() {
        let (mut encounter, config) = spawn(10);
        let killed_at = SystemTime::now();
        encounter.apply_damage(10, killed_at, DELAY);

        let early = encounter.respawn(true, RespawnTrigger::Timer, &config, killed_at);
        assert!(matches!(early, Err(EncounterError::RespawnNotDue(_))));

        let due = killed_at + DELAY;
        let previous_id = encounter.id;
        let outcome = encounter.respawn(true, RespawnTrigger::Timer, &config, due);
        assert_eq!(outcome, Ok(RespawnOutcome::Spawned { boss_index: 2 }));
        assert_ne!(encounter.id, previous_id);
        assert_eq!(encounter.current_health(), encounter.max_health);
        assert_eq!(encounter.rage(), RagePhase::Calm);
        assert!(!encounter.kill_resolved());
    }

    #[test]
    fn timer_cannot_respawn_a_living_boss() {
        let (mut encounter, config) = spawn(10);
        let outcome = encounter.respawn(true, RespawnTrigger::Timer, &config, SystemTime::now());
        assert_eq!(outcome, Err(EncounterError::NotRespawning));
    }

    #[test]
    fn admin_respawn_without_advance_keeps_index() {
        let (mut encounter, config) = spawn(10);
        let outcome = encounter.respawn(false, RespawnTrigger::Admin, &config, SystemTime::now());
        assert_eq!(outcome, Ok(RespawnOutcome::Spawned { boss_index: 1 }));
    }

    #[test]
    fn roster_exhaustion_finishes_the_series() {
        let config = config_with_health(10, 1);
        let now = SystemTime::now();
        let mut encounter = BossEncounter::spawn(1, config.roster.definition(1), &config, now);
        encounter.apply_damage(10, now, DELAY);

        let outcome = encounter.respawn(true, RespawnTrigger::Timer, &config, now + DELAY);
        assert_eq!(outcome, Ok(RespawnOutcome::Finished));
        assert!(matches!(encounter.phase(), EncounterPhase::Finished { .. }));
        assert_eq!(
            encounter.respawn(true, RespawnTrigger::Admin, &config, now + DELAY),
            Err(EncounterError::Finished)
        );
        assert_eq!(
            encounter.apply_damage(5, now, DELAY),
            DamageApplication::Ignored
        );
    }
}
