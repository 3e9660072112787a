//! Single-writer owner of the active encounter.
//!
//! Every mutation of the boss and its contribution records is a [`Command`] drained by
//! [`Coordinator::run`]. Sessions and timers hold a [`CoordinatorHandle`] and never touch the
//! encounter directly. Kill resolution runs inside the same loop, right after the command
//! whose hit brought health to zero, so nothing can interleave with it.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::models::{EncounterEntity, EncounterSummaryEntity, LeaderboardRecord, LeaderboardV2},
    dto::{
        format_system_time,
        sse::{
            BossFinishedEvent, BossHealthEvent, BossKilledEvent, BossRespawnedEvent,
            DamageFeedEntry,
        },
    },
    error::{ServiceError, TARGET_DEFEATED},
    services::{reward_service, sse_events},
    state::{
        SharedState,
        dampening::DampeningState,
        encounter::{
            BossEncounter, DamageApplication, EncounterError, EncounterPhase, RagePhase,
            RespawnOutcome, RespawnTrigger,
        },
        participation::{ActivityEcho, ContributionRecord, ParticipationTracker, PlayerIdentity},
        rewards::{Standing, damage_percent, is_reward_eligible, rank_contributions},
    },
};

/// Leaderboard rows included in [`EncounterView`].
const VIEW_LEADERBOARD_SIZE: usize = 10;
/// Feed entries kept between two health broadcasts.
const FEED_LIMIT: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Periodic work scheduled against the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Push `boss.health` and the pending damage feed.
    Broadcast,
    /// Fold throughput into the dampening EMA.
    Sample,
    /// Recompute the dampening multiplier.
    Recompute,
    /// Participation Score accrual.
    Participation,
    /// Spawn the next boss once the respawn delay elapsed.
    RespawnCheck,
}

/// Messages accepted by the coordinator loop.
pub enum Command {
    /// A batch of raw hits from one attacker.
    Damage {
        identity: PlayerIdentity,
        amounts: Vec<u64>,
        reply: Reply<DamageReceipt>,
    },
    /// Spend skill points on an unlocked ability.
    Ability {
        identity: PlayerIdentity,
        ability_id: String,
        reply: Reply<AbilityReceipt>,
    },
    /// Liveness report; `reported` is the client's own delta and is capped server-side.
    Ping {
        player_id: String,
        reported: Duration,
        reply: Reply<ActivityEcho>,
    },
    View {
        reply: Reply<EncounterView>,
    },
    /// Summary of the last resolved kill, if any.
    Previous {
        reply: Reply<Option<EncounterSummaryEntity>>,
    },
    /// Persistable copy of the encounter and its leaderboard.
    Snapshot {
        reply: Reply<EncounterEntity>,
    },
    /// Operator respawn. `advance` moves to the next roster entry.
    ForceRespawn {
        advance: bool,
        reply: Reply<RespawnOutcome>,
    },
    /// Sent by the interval tasks.
    Timer(TimerTick),
}

/// Outcome of a damage batch, echoed to the attacker.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageReceipt {
    pub encounter_id: Uuid,
    /// Damage that reduced health, after dampening and clamping.
    pub accepted: u64,
    /// Scaled damage dropped because it exceeded the remaining health.
    pub overflow: u64,
    /// Hits that arrived after the boss died within the same batch.
    pub ignored: usize,
    /// Whether this batch landed the final blow.
    pub killed: bool,
    pub current_health: u64,
    pub max_health: u64,
    pub rage: RagePhase,
    pub multiplier: f64,
    /// Boss damage reflected to the attacker for this batch.
    pub retaliation: u64,
    /// Attacker's running total for this encounter.
    pub contribution: u64,
}

/// Outcome of a special ability cast.
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityReceipt {
    pub ability_id: String,
    /// Skill points left after the cast.
    pub skill_points: u64,
    /// The ability's damage, resolved like a normal hit.
    pub hit: DamageReceipt,
}

/// Read-only projection of the encounter.
#[derive(Debug, Clone)]
pub struct EncounterView {
    pub id: Uuid,
    /// 1-based roster index.
    pub boss_index: u32,
    pub name: String,
    pub title: String,
    pub max_health: u64,
    pub current_health: u64,
    /// Remaining health in percent, for display.
    pub health_percent: f64,
    pub rage: RagePhase,
    /// Retaliation per hit.
    pub thorns: u64,
    /// Current dampening multiplier.
    pub multiplier: f64,
    /// Smoothed damage per second.
    pub throughput_ema: f64,
    pub phase: EncounterPhase,
    /// Rewards for the kill have been distributed.
    pub kill_resolved: bool,
    pub started_at: SystemTime,
    /// Earliest time the boss is paced to die.
    pub target_end_at: SystemTime,
    /// Players with a contribution record.
    pub participants: usize,
    /// Sum of recorded contributions.
    pub total_damage: u64,
    /// Top damage dealers, best first.
    pub leaderboard: Vec<Standing>,
}

/// Cloneable sender side of the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    revisions: watch::Receiver<u64>,
}

/// Receiver side, consumed by [`Coordinator::restore`].
pub struct CoordinatorInbox {
    rx: mpsc::Receiver<Command>,
    revision_tx: watch::Sender<u64>,
}

/// Create the command queue shared by the handle and the coordinator task.
pub fn channel(capacity: usize) -> (CoordinatorHandle, CoordinatorInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (revision_tx, revisions) = watch::channel(0);
    (
        CoordinatorHandle { tx, revisions },
        CoordinatorInbox { rx, revision_tx },
    )
}

fn coordinator_gone() -> ServiceError {
    ServiceError::InvariantViolation("encounter coordinator is not running".into())
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| coordinator_gone())?;
        response.await.map_err(|_| coordinator_gone())?
    }

    /// Apply a batch of raw hits for `identity`.
    pub async fn damage(
        &self,
        identity: PlayerIdentity,
        amounts: Vec<u64>,
    ) -> Result<DamageReceipt, ServiceError> {
        self.request(|reply| Command::Damage {
            identity,
            amounts,
            reply,
        })
        .await
    }

    /// Cast an ability for the caller.
    pub async fn ability(
        &self,
        identity: PlayerIdentity,
        ability_id: String,
    ) -> Result<AbilityReceipt, ServiceError> {
        self.request(|reply| Command::Ability {
            identity,
            ability_id,
            reply,
        })
        .await
    }

    /// Credit client-reported liveness.
    pub async fn ping(
        &self,
        player_id: String,
        reported: Duration,
    ) -> Result<ActivityEcho, ServiceError> {
        self.request(|reply| Command::Ping {
            player_id,
            reported,
            reply,
        })
        .await
    }

    /// Snapshot of the encounter for REST and the live handshake.
    pub async fn view(&self) -> Result<EncounterView, ServiceError> {
        self.request(|reply| Command::View { reply }).await
    }

    /// Summary of the last resolved kill.
    pub async fn previous(&self) -> Result<Option<EncounterSummaryEntity>, ServiceError> {
        self.request(|reply| Command::Previous { reply }).await
    }

    /// Persistable copy of the encounter.
    pub async fn snapshot(&self) -> Result<EncounterEntity, ServiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Operator respawn, bypassing the respawn delay.
    pub async fn force_respawn(&self, advance: bool) -> Result<RespawnOutcome, ServiceError> {
        self.request(|reply| Command::ForceRespawn { advance, reply })
            .await
    }

    /// Queue a timer tick. Returns `false` once the coordinator is gone.
    pub async fn tick(&self, tick: TimerTick) -> bool {
        self.tx.send(Command::Timer(tick)).await.is_ok()
    }

    /// Bumped after every mutation; the persistence task debounces on it.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revisions.clone()
    }
}

/// The actor itself. Built once at start-up, then moved into its task.
pub struct Coordinator {
    state: SharedState,
    config: Arc<AppConfig>,
    encounter: BossEncounter,
    tracker: ParticipationTracker,
    previous: Option<EncounterSummaryEntity>,
    final_blow: Option<String>,
    feed: Vec<DamageFeedEntry>,
    inbox: CoordinatorInbox,
    revision: u64,
}

impl Coordinator {
    /// Rebuild from the stored snapshot when there is one, otherwise spawn the first boss.
    pub async fn restore(state: SharedState, inbox: CoordinatorInbox) -> Self {
        let config = state.config();
        let now = SystemTime::now();

        let stored = match state.encounter_store().await {
            Some(store) => match store.find_encounter().await {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(error = %err, "failed to load encounter snapshot; spawning a fresh boss");
                    None
                }
            },
            None => {
                warn!("no storage backend at start-up; spawning a fresh boss");
                None
            }
        };

        let (encounter, tracker, previous) = match stored {
            Some(entity) => {
                let restored = from_entity(entity, &config);
                info!(
                    encounter_id = %restored.0.id,
                    boss_index = restored.0.boss_index,
                    current_health = restored.0.current_health(),
                    participants = restored.1.len(),
                    "encounter restored from snapshot"
                );
                restored
            }
            None => {
                let encounter = BossEncounter::spawn(1, config.roster.definition(1), &config, now);
                info!(encounter_id = %encounter.id, boss = %encounter.name, "first boss spawned");
                (encounter, ParticipationTracker::new(), None)
            }
        };

        let mut coordinator = Self {
            state,
            config,
            encounter,
            tracker,
            previous,
            final_blow: None,
            feed: Vec::new(),
            inbox,
            revision: 0,
        };
        coordinator.bump_revision();
        coordinator
    }

    /// Drain commands until every handle is dropped.
    pub async fn run(mut self) {
        // A snapshot taken between the final blow and its resolution.
        self.resolve_pending_kill().await;

        while let Some(command) = self.inbox.rx.recv().await {
            self.handle(command);
            self.resolve_pending_kill().await;
        }
        info!("encounter coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Damage {
                identity,
                amounts,
                reply,
            } => {
                let _ = reply.send(self.apply_batch(identity, amounts));
            }
            Command::Ability {
                identity,
                ability_id,
                reply,
            } => {
                let _ = reply.send(self.cast_ability(identity, ability_id));
            }
            Command::Ping {
                player_id,
                reported,
                reply,
            } => {
                let echo = self.tracker.record_ping(
                    &player_id,
                    reported,
                    SystemTime::now(),
                    &self.config.participation,
                );
                if echo.tracked {
                    self.bump_revision();
                }
                let _ = reply.send(Ok(echo));
            }
            Command::View { reply } => {
                let _ = reply.send(Ok(self.view()));
            }
            Command::Previous { reply } => {
                let _ = reply.send(Ok(self.previous.clone()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.to_entity()));
            }
            Command::ForceRespawn { advance, reply } => {
                let result = self.respawn(advance, RespawnTrigger::Admin);
                let _ = reply.send(result);
            }
            Command::Timer(tick) => self.on_tick(tick),
        }
    }

    fn validate_batch(&self, amounts: &[u64]) -> Result<(), ServiceError> {
        let limits = &self.config.encounter;
        if amounts.is_empty() {
            return Err(ServiceError::Validation("damage batch is empty".into()));
        }
        if amounts.len() > limits.max_batch_size {
            return Err(ServiceError::Validation(format!(
                "damage batch exceeds {} hits",
                limits.max_batch_size
            )));
        }
        if amounts.iter().any(|raw| *raw > limits.max_raw_hit) {
            return Err(ServiceError::Validation(format!(
                "raw damage above {} is not allowed",
                limits.max_raw_hit
            )));
        }
        Ok(())
    }

    fn apply_batch(
        &mut self,
        identity: PlayerIdentity,
        amounts: Vec<u64>,
    ) -> Result<DamageReceipt, ServiceError> {
        self.validate_batch(&amounts)?;
        if !self.encounter.is_alive() {
            return Err(ServiceError::StateConflict(TARGET_DEFEATED.into()));
        }

        let now = SystemTime::now();
        let mut totals = HitTotals::default();
        for raw in amounts {
            totals.add(self.apply_hit(raw, now));
        }
        let contribution = self.tracker.record_damage(&identity, totals.accepted, now).damage;
        Ok(self.settle_hit(&identity, None, totals, contribution))
    }

    fn cast_ability(
        &mut self,
        identity: PlayerIdentity,
        ability_id: String,
    ) -> Result<AbilityReceipt, ServiceError> {
        let ability = self
            .config
            .ability(&ability_id)
            .cloned()
            .ok_or_else(|| ServiceError::Validation(format!("unknown ability `{ability_id}`")))?;
        if !self.encounter.is_alive() {
            return Err(ServiceError::StateConflict(TARGET_DEFEATED.into()));
        }

        let not_loaded = || ServiceError::StateConflict("profile not loaded".into());
        let skill_points = {
            let mut slot = self
                .state
                .players()
                .get_mut(&identity.player_id)
                .ok_or_else(not_loaded)?;
            slot.mutate(|profile| {
                profile
                    .spend_for_ability(&ability)
                    .map(|()| profile.skill_points)
            })
            .ok_or_else(not_loaded)??
        };

        let now = SystemTime::now();
        let mut totals = HitTotals::default();
        totals.add(self.apply_hit(ability.damage, now));
        let contribution = self
            .tracker
            .record_ability(&identity, &ability.id, totals.accepted, now)
            .damage;

        Ok(AbilityReceipt {
            hit: self.settle_hit(&identity, Some(ability.id.clone()), totals, contribution),
            ability_id: ability.id,
            skill_points,
        })
    }

    fn apply_hit(&mut self, raw: u64, now: SystemTime) -> DamageApplication {
        let before = self.encounter.current_health();
        let hit = self
            .encounter
            .apply_damage(raw, now, self.config.encounter.respawn_delay);
        if self.encounter.current_health() > before {
            error!(
                encounter_id = %self.encounter.id,
                before,
                after = self.encounter.current_health(),
                "health increased while applying damage"
            );
        }
        hit
    }

    fn settle_hit(
        &mut self,
        identity: &PlayerIdentity,
        ability: Option<String>,
        totals: HitTotals,
        contribution: u64,
    ) -> DamageReceipt {
        if totals.killed {
            self.final_blow = Some(identity.player_id.clone());
            info!(
                encounter_id = %self.encounter.id,
                boss = %self.encounter.name,
                player_id = %identity.player_id,
                "final blow landed"
            );
        }
        if totals.accepted > 0 && self.feed.len() < FEED_LIMIT {
            self.feed.push(DamageFeedEntry {
                player_id: identity.player_id.clone(),
                display_name: identity.display_name.clone(),
                damage: totals.accepted,
                ability,
            });
        }
        self.bump_revision();

        DamageReceipt {
            encounter_id: self.encounter.id,
            accepted: totals.accepted,
            overflow: totals.overflow,
            ignored: totals.ignored,
            killed: totals.killed,
            current_health: self.encounter.current_health(),
            max_health: self.encounter.max_health,
            rage: self.encounter.rage(),
            multiplier: self.encounter.dampening.multiplier,
            retaliation: self.encounter.retaliation() * totals.landed,
            contribution,
        }
    }

    fn on_tick(&mut self, tick: TimerTick) {
        let now = SystemTime::now();
        match tick {
            TimerTick::Broadcast => self.broadcast(),
            TimerTick::Sample => {
                if let Some(instant) = self
                    .encounter
                    .sample_throughput(now, self.config.dampening.alpha)
                {
                    debug!(
                        instant_dps = instant,
                        ema = self.encounter.dampening.throughput_ema,
                        "throughput sampled"
                    );
                    self.bump_revision();
                }
            }
            TimerTick::Recompute => {
                if let Some(multiplier) =
                    self.encounter.recompute_multiplier(now, &self.config.dampening)
                {
                    info!(
                        encounter_id = %self.encounter.id,
                        multiplier,
                        ema = self.encounter.dampening.throughput_ema,
                        current_health = self.encounter.current_health(),
                        "dampening multiplier recomputed"
                    );
                    self.bump_revision();
                }
            }
            TimerTick::Participation => {
                if !self.encounter.is_alive() {
                    return;
                }
                let summary = self.tracker.tick(now, &self.config.participation);
                debug!(
                    accrued = summary.accrued.len(),
                    capped = summary.capped,
                    idle = summary.idle,
                    ineligible = summary.ineligible,
                    "participation tick"
                );
                if !self.tracker.is_empty() {
                    self.bump_revision();
                }
            }
            TimerTick::RespawnCheck => {
                if !matches!(self.encounter.phase(), EncounterPhase::Respawning { .. }) {
                    return;
                }
                match self.respawn(true, RespawnTrigger::Timer) {
                    Ok(_) | Err(ServiceError::StateConflict(_)) => {}
                    Err(err) => warn!(error = %err, "respawn check failed"),
                }
            }
        }
    }

    fn broadcast(&mut self) {
        if !self.feed.is_empty() {
            let entries = std::mem::take(&mut self.feed);
            sse_events::broadcast_damage_feed(&self.state, self.encounter.id, entries);
        }
        if !self.encounter.is_alive() {
            return;
        }
        sse_events::broadcast_boss_health(
            &self.state,
            &BossHealthEvent {
                encounter_id: self.encounter.id,
                boss_index: self.encounter.boss_index,
                current_health: self.encounter.current_health(),
                max_health: self.encounter.max_health,
                health_percent: self.encounter.health_percent(),
                rage: self.encounter.rage().as_str().to_string(),
                multiplier: self.encounter.dampening.multiplier,
            },
        );
    }

    fn respawn(
        &mut self,
        advance: bool,
        trigger: RespawnTrigger,
    ) -> Result<RespawnOutcome, ServiceError> {
        if matches!(self.encounter.phase(), EncounterPhase::Respawning { .. })
            && !self.encounter.kill_resolved()
        {
            return Err(ServiceError::StateConflict(
                "kill resolution still pending".into(),
            ));
        }

        let now = SystemTime::now();
        let previous_id = self.encounter.id;
        let outcome = match self.encounter.respawn(advance, trigger, &self.config, now) {
            Ok(outcome) => outcome,
            Err(EncounterError::RespawnNotDue(_)) | Err(EncounterError::NotRespawning) => {
                return Err(ServiceError::StateConflict("respawn not due".into()));
            }
            Err(err) => return Err(err.into()),
        };

        match &outcome {
            RespawnOutcome::Spawned { boss_index } => {
                self.tracker.clear();
                self.final_blow = None;
                self.feed.clear();
                info!(
                    previous_encounter = %previous_id,
                    encounter_id = %self.encounter.id,
                    boss_index,
                    boss = %self.encounter.name,
                    ?trigger,
                    "boss respawned"
                );
                sse_events::broadcast_boss_respawned(
                    &self.state,
                    &BossRespawnedEvent {
                        encounter_id: self.encounter.id,
                        boss_index: self.encounter.boss_index,
                        boss_name: self.encounter.name.clone(),
                        boss_title: self.encounter.title.clone(),
                        max_health: self.encounter.max_health,
                        target_end_at: format_system_time(self.encounter.target_end_at),
                    },
                );
            }
            RespawnOutcome::Finished => {
                info!(
                    boss_index = self.encounter.boss_index,
                    "boss roster exhausted; encounter series finished"
                );
                sse_events::broadcast_boss_finished(
                    &self.state,
                    &BossFinishedEvent {
                        boss_index: self.encounter.boss_index,
                        finished_at: format_system_time(now),
                    },
                );
            }
        }
        self.bump_revision();
        Ok(outcome)
    }

    async fn resolve_pending_kill(&mut self) {
        if self.encounter.current_health() > 0 || self.encounter.kill_resolved() {
            return;
        }
        if let Err(err) = self.encounter.begin_kill_resolution() {
            error!(encounter_id = %self.encounter.id, error = %err, "kill resolution refused");
            return;
        }

        let (killed_at, respawn_at) = match self.encounter.phase() {
            EncounterPhase::Respawning {
                killed_at,
                respawn_at,
            } => (killed_at, respawn_at),
            _ => {
                let now = SystemTime::now();
                (now, now + self.config.encounter.respawn_delay)
            }
        };

        let records: Vec<ContributionRecord> = self.tracker.records().cloned().collect();
        let report = reward_service::distribute(
            &self.state,
            &self.encounter,
            &records,
            killed_at,
            self.final_blow.clone(),
        )
        .await;

        let top_damage = report.plan.top().map(|top| top.display_name.clone());
        let final_blow_name = self
            .final_blow
            .as_deref()
            .and_then(|id| self.tracker.get(id))
            .map(|record| record.display_name.clone());

        info!(
            encounter_id = %self.encounter.id,
            boss = %self.encounter.name,
            total_damage = report.plan.total_damage,
            participants = records.len(),
            grants_written = report.grants_written,
            grants_duplicate = report.grants_duplicate,
            grants_failed = report.grants_failed,
            "kill resolved"
        );

        self.previous = Some(EncounterSummaryEntity {
            encounter_id: self.encounter.id,
            boss_index: self.encounter.boss_index,
            boss_name: self.encounter.name.clone(),
            boss_title: self.encounter.title.clone(),
            total_damage: report.plan.total_damage,
            killed_at,
            final_blow: self.final_blow.clone(),
            leaderboard: rank_contributions(&records)
                .into_iter()
                .map(|record| LeaderboardRecord::from(LeaderboardV2::from(record)))
                .collect(),
        });

        sse_events::broadcast_boss_killed(
            &self.state,
            &BossKilledEvent {
                encounter_id: self.encounter.id,
                boss_index: self.encounter.boss_index,
                boss_name: self.encounter.name.clone(),
                final_blow: final_blow_name,
                top_damage,
                total_damage: report.plan.total_damage,
                participants: records.len(),
                prizes: report.plan.total_chests(),
                respawn_at: format_system_time(respawn_at),
                respawn_in_secs: respawn_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs(),
            },
        );
        self.bump_revision();
    }

    fn view(&self) -> EncounterView {
        let total_damage = self.tracker.total_damage();
        let fraction = self.config.rewards.negligible_damage_fraction;
        let leaderboard = rank_contributions(self.tracker.records())
            .into_iter()
            .take(VIEW_LEADERBOARD_SIZE)
            .enumerate()
            .map(|(index, record)| Standing {
                position: index as u32 + 1,
                player_id: record.player_id.clone(),
                display_name: record.display_name.clone(),
                avatar: record.avatar.clone(),
                damage: record.damage,
                damage_percent: damage_percent(record.damage, total_damage),
                participation_score: record.participation_score,
                reward_eligible: is_reward_eligible(record.damage, total_damage, fraction),
            })
            .collect();

        EncounterView {
            id: self.encounter.id,
            boss_index: self.encounter.boss_index,
            name: self.encounter.name.clone(),
            title: self.encounter.title.clone(),
            max_health: self.encounter.max_health,
            current_health: self.encounter.current_health(),
            health_percent: self.encounter.health_percent(),
            rage: self.encounter.rage(),
            thorns: self.encounter.thorns(),
            multiplier: self.encounter.dampening.multiplier,
            throughput_ema: self.encounter.dampening.throughput_ema,
            phase: self.encounter.phase(),
            kill_resolved: self.encounter.kill_resolved(),
            started_at: self.encounter.started_at,
            target_end_at: self.encounter.target_end_at,
            participants: self.tracker.len(),
            total_damage,
            leaderboard,
        }
    }

    fn to_entity(&self) -> EncounterEntity {
        let dampening = &self.encounter.dampening;
        EncounterEntity {
            id: self.encounter.id,
            boss_index: self.encounter.boss_index,
            max_health: self.encounter.max_health,
            current_health: self.encounter.current_health(),
            cumulative_damage: self.encounter.cumulative_damage(),
            started_at: self.encounter.started_at,
            target_end_at: self.encounter.target_end_at,
            multiplier: dampening.multiplier,
            throughput_ema: dampening.throughput_ema,
            last_sample_at: dampening.last_sample_at,
            last_sample_damage: dampening.last_sample_damage,
            phase: self.encounter.phase().into(),
            kill_resolved: self.encounter.kill_resolved(),
            leaderboard: self
                .tracker
                .records()
                .map(|record| LeaderboardRecord::from(LeaderboardV2::from(record)))
                .collect(),
            previous: self.previous.clone(),
            updated_at: SystemTime::now(),
        }
    }

    fn bump_revision(&mut self) {
        self.revision += 1;
        self.inbox.revision_tx.send_replace(self.revision);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HitTotals {
    accepted: u64,
    overflow: u64,
    ignored: usize,
    landed: u64,
    killed: bool,
}

impl HitTotals {
    fn add(&mut self, hit: DamageApplication) {
        match hit {
            DamageApplication::Applied {
                applied,
                overflow,
                killed,
            } => {
                self.accepted = self.accepted.saturating_add(applied);
                self.overflow = self.overflow.saturating_add(overflow);
                self.landed += 1;
                self.killed |= killed;
            }
            DamageApplication::Ignored => self.ignored += 1,
        }
    }
}

fn from_entity(
    entity: EncounterEntity,
    config: &AppConfig,
) -> (
    BossEncounter,
    ParticipationTracker,
    Option<EncounterSummaryEntity>,
) {
    let boss = config.roster.definition(entity.boss_index);
    let dampening = DampeningState {
        multiplier: entity.multiplier.clamp(
            config.dampening.min_multiplier,
            config.dampening.max_multiplier,
        ),
        throughput_ema: entity.throughput_ema,
        last_sample_at: entity.last_sample_at,
        last_sample_damage: entity.last_sample_damage,
    };
    let encounter = BossEncounter::restore(
        entity.id,
        entity.boss_index,
        boss,
        entity.max_health,
        entity.current_health,
        entity.cumulative_damage,
        entity.started_at,
        entity.target_end_at,
        dampening,
        entity.phase.into(),
        entity.kill_resolved,
    );
    let tracker = ParticipationTracker::from_records(
        entity
            .leaderboard
            .into_iter()
            .map(|record| ContributionRecord::from(record.migrate())),
    );
    (encounter, tracker, entity.previous)
}

/// Start one interval task per [`TimerTick`]. Each stops when the coordinator goes away.
pub fn spawn_timers(handle: &CoordinatorHandle, config: &AppConfig) -> Vec<JoinHandle<()>> {
    let schedule = [
        (TimerTick::Broadcast, config.runtime.broadcast_interval),
        (TimerTick::Sample, config.dampening.sample_interval),
        (TimerTick::Recompute, config.dampening.recompute_interval),
        (TimerTick::Participation, config.participation.tick_interval),
        (TimerTick::RespawnCheck, config.runtime.respawn_check_interval),
    ];

    schedule
        .into_iter()
        .map(|(tick, period)| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut ticker = interval(period.max(Duration::from_millis(10)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !handle.tick(tick).await {
                        debug!(?tick, "coordinator gone; timer stopped");
                        break;
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BossDefinition, BossRoster},
        dao::{
            encounter_store::{EncounterStore, MemoryStore},
            models::{EncounterPhaseEntity, LeaderboardV1},
        },
        state::{
            AppState,
            player::{PlayerProfile, PlayerSlot},
        },
    };

    fn config(max_health: u64, total_bosses: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.encounter.respawn_delay = Duration::ZERO;
        config.roster = BossRoster {
            total_bosses,
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

    async fn start(config: AppConfig, store: &MemoryStore) -> SharedState {
        let (state, inbox) = AppState::new(config);
        state.set_encounter_store(Arc::new(store.clone())).await;
        let coordinator = Coordinator::restore(state.clone(), inbox).await;
        tokio::spawn(coordinator.run());
        state
    }

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            player_id: id.into(),
            display_name: id.to_uppercase(),
            avatar: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_damage_kills_exactly_once() {
        let store = MemoryStore::new();
        let state = start(config(10_000, 3), &store).await;

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let handle = state.coordinator().clone();
                tokio::spawn(async move {
                    handle
                        .damage(identity(&format!("p{}", i % 10)), vec![150, 150])
                        .await
                })
            })
            .collect();

        let mut kills = 0;
        let mut accepted = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(receipt) => {
                    accepted += receipt.accepted;
                    kills += usize::from(receipt.killed);
                }
                Err(ServiceError::StateConflict(reason)) => {
                    assert_eq!(reason, TARGET_DEFEATED);
                    rejected += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(kills, 1);
        assert_eq!(accepted, 10_000);
        assert!(rejected > 0);

        let view = state.coordinator().view().await.unwrap();
        assert_eq!(view.current_health, 0);
        assert_eq!(view.total_damage, 10_000);
        assert!(view.kill_resolved);
        assert_eq!(store.history_len(), 1);

        let snapshot = state.coordinator().snapshot().await.unwrap();
        assert_eq!(snapshot.cumulative_damage, 10_000);
    }

    #[tokio::test]
    async fn damage_on_a_dead_boss_is_rejected() {
        let store = MemoryStore::new();
        let state = start(config(100, 3), &store).await;
        let handle = state.coordinator();

        let receipt = handle.damage(identity("a"), vec![60, 60, 60]).await.unwrap();
        assert!(receipt.killed);
        assert_eq!(receipt.accepted, 100);
        assert_eq!(receipt.overflow, 20);
        assert_eq!(receipt.ignored, 1);

        let err = handle.damage(identity("b"), vec![1]).await.unwrap_err();
        assert!(matches!(err, ServiceError::StateConflict(reason) if reason == TARGET_DEFEATED));
    }

    #[tokio::test]
    async fn malformed_batches_are_rejected_without_applying() {
        let store = MemoryStore::new();
        let mut config = config(1_000, 3);
        config.encounter.max_batch_size = 2;
        config.encounter.max_raw_hit = 100;
        let state = start(config, &store).await;
        let handle = state.coordinator();

        for batch in [vec![], vec![1, 1, 1], vec![10, 101]] {
            let err = handle.damage(identity("a"), batch).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
        let view = handle.view().await.unwrap();
        assert_eq!(view.current_health, 1_000);
        assert_eq!(view.participants, 0);
    }

    #[tokio::test]
    async fn respawn_check_spawns_the_next_boss_and_clears_contributions() {
        let store = MemoryStore::new();
        let state = start(config(100, 2), &store).await;
        let handle = state.coordinator();

        let killed = handle.damage(identity("a"), vec![100]).await.unwrap();
        assert!(handle.tick(TimerTick::RespawnCheck).await);

        let view = handle.view().await.unwrap();
        assert_eq!(view.boss_index, 2);
        assert_ne!(view.id, killed.encounter_id);
        assert_eq!(view.current_health, 100);
        assert_eq!(view.participants, 0);

        let previous = handle.previous().await.unwrap().unwrap();
        assert_eq!(previous.encounter_id, killed.encounter_id);
        assert_eq!(previous.final_blow.as_deref(), Some("a"));

        handle.damage(identity("a"), vec![100]).await.unwrap();
        handle.tick(TimerTick::RespawnCheck).await;
        let view = handle.view().await.unwrap();
        assert!(matches!(view.phase, EncounterPhase::Finished { .. }));
        assert!(handle.damage(identity("a"), vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn forced_respawn_keeps_index_when_not_advancing() {
        let store = MemoryStore::new();
        let state = start(config(100, 3), &store).await;
        let handle = state.coordinator();
        let before = handle.view().await.unwrap();

        let outcome = handle.force_respawn(false).await.unwrap();
        assert_eq!(outcome, RespawnOutcome::Spawned { boss_index: 1 });
        assert_ne!(handle.view().await.unwrap().id, before.id);
    }

    #[tokio::test]
    async fn abilities_spend_skill_points_only_when_allowed() {
        let store = MemoryStore::new();
        let state = start(config(1_000_000, 3), &store).await;
        let handle = state.coordinator();

        let err = handle
            .ability(identity("a"), "cleave".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StateConflict(_)));

        let mut profile = PlayerProfile::new("a", SystemTime::now());
        profile.level = 3;
        profile.skill_points = 1;
        profile.unlocked_skills.insert("cleave".into());
        let mut slot = PlayerSlot::unloaded();
        slot.install(profile);
        state.players().insert("a".into(), slot);

        let receipt = handle.ability(identity("a"), "cleave".into()).await.unwrap();
        assert_eq!(receipt.skill_points, 0);
        assert_eq!(receipt.hit.accepted, 2_500);

        let err = handle
            .ability(identity("a"), "cleave".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StateConflict(reason) if reason == "not enough resource"));

        let err = handle
            .ability(identity("a"), "fireball".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn unresolved_kill_in_snapshot_is_resolved_on_restore() {
        let store = MemoryStore::new();
        let now = SystemTime::now();
        let encounter_id = Uuid::new_v4();
        store
            .save_encounter(EncounterEntity {
                id: encounter_id,
                boss_index: 1,
                max_health: 500,
                current_health: 0,
                cumulative_damage: 500,
                started_at: now,
                target_end_at: now,
                multiplier: 1.0,
                throughput_ema: 0.0,
                last_sample_at: now,
                last_sample_damage: 0,
                phase: EncounterPhaseEntity::Respawning {
                    killed_at: now,
                    respawn_at: now + Duration::from_secs(3_600),
                },
                kill_resolved: false,
                leaderboard: vec![LeaderboardRecord::V1(LeaderboardV1 {
                    player_id: "veteran".into(),
                    damage: 500,
                })],
                previous: None,
                updated_at: now,
            })
            .await
            .unwrap();

        let state = start(config(500, 3), &store).await;
        let view = state.coordinator().view().await.unwrap();
        assert_eq!(view.id, encounter_id);
        assert!(view.kill_resolved);

        let grant = store
            .find_reward_grant("veteran".into(), encounter_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.rank, Some(1));
        assert_eq!(store.history_len(), 1);
    }
}
