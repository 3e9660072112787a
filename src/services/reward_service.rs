//! Reward commit at kill time, grant claims and chest opening.

use std::{collections::HashMap, time::SystemTime};

use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{EncounterHistoryEntity, RewardGrantEntity},
    dto::{
        rewards::{ChestOpenedResponse, ClaimResponse, PlayerRewardsResponse, RewardGrantSummary},
        ws::{LevelUpPayload, PlayerOutboundMessage, RewardGrantedPayload},
    },
    error::ServiceError,
    services::{player_service, websocket_service},
    state::{
        SharedState,
        claims::{chest_claim_key, grant_claim_key},
        encounter::BossEncounter,
        participation::ContributionRecord,
        player::{LevelProgress, PlayerError},
        rewards::{ChestTier, PlannedReward, RewardBundle, RewardPlan, plan_rewards},
    },
};

/// What the commit managed to write.
#[derive(Debug, Clone)]
pub struct KillReport {
    /// Ranking and per-player rewards the commit worked from.
    pub plan: RewardPlan,
    /// Contributors whose grant row was written and progress credited.
    pub grants_written: usize,
    /// Contributors already distributed for this encounter; nothing credited again.
    pub grants_duplicate: usize,
    /// Grants that could not be written; their contributors are skipped.
    pub grants_failed: usize,
}

/// Plan and commit the rewards of a kill.
///
/// Every contributor gets one grant row keyed by `(player, encounter)`, with an empty bundle
/// when they did not reach the reward threshold. Experience and skill points are credited only
/// after that row is inserted, so a second distribution of the same encounter credits nothing.
/// Storage failures for one contributor are logged and skipped; the rest carries on.
///
/// Without a store the rewards are credited in memory and no grant is written.
pub async fn distribute(
    state: &SharedState,
    encounter: &BossEncounter,
    records: &[ContributionRecord],
    killed_at: SystemTime,
    final_blow: Option<String>,
) -> KillReport {
    let config = state.config();
    let boss = config.roster.definition(encounter.boss_index);

    let mut levels = HashMap::with_capacity(records.len());
    for record in records {
        if let Err(err) = player_service::ensure_loaded(state, &record.player_id).await {
            warn!(
                player_id = %record.player_id,
                error = %err,
                "profile unavailable at kill time; assuming level 1"
            );
        }
        if let Some(profile) = player_service::profile_snapshot(state, &record.player_id) {
            levels.insert(record.player_id.clone(), profile.level);
        }
    }

    let plan = plan_rewards(
        encounter.id,
        encounter.boss_index,
        boss,
        records.iter(),
        &levels,
        &config,
    );

    let store = state.encounter_store().await;
    if store.is_none() {
        warn!(
            encounter_id = %encounter.id,
            contributors = plan.rewards.len(),
            "storage unavailable (degraded mode); reward grants not written"
        );
    }

    let mut report = KillReport {
        plan,
        grants_written: 0,
        grants_duplicate: 0,
        grants_failed: 0,
    };
    for reward in &report.plan.rewards {
        if let Some(store) = &store {
            let damage = records
                .iter()
                .find(|record| record.player_id == reward.player_id)
                .map_or(0, |record| record.damage);
            match store
                .insert_reward_grant(grant_row(encounter, reward, damage, killed_at))
                .await
            {
                Ok(()) => report.grants_written += 1,
                Err(err) if err.is_conflict() => {
                    report.grants_duplicate += 1;
                    warn!(
                        player_id = %reward.player_id,
                        encounter_id = %encounter.id,
                        "rewards already distributed for this encounter; skipping"
                    );
                    continue;
                }
                Err(err) => {
                    report.grants_failed += 1;
                    warn!(
                        player_id = %reward.player_id,
                        encounter_id = %encounter.id,
                        error = %err,
                        "failed to persist reward grant; skipping contributor"
                    );
                    continue;
                }
            }
        }
        credit_progress(state, reward);
        notify_reward(state, encounter, reward);
    }

    if let Some(store) = &store {
        let history = EncounterHistoryEntity {
            encounter_id: encounter.id,
            boss_index: encounter.boss_index,
            boss_name: encounter.name.clone(),
            max_health: encounter.max_health,
            total_damage: report.plan.total_damage,
            participants: report.plan.standings.len() as u32,
            started_at: encounter.started_at,
            killed_at,
            final_blow,
            top_damage: report.plan.top().map(|top| top.player_id.clone()),
        };
        if let Err(err) = store.insert_encounter_history(history).await {
            warn!(encounter_id = %encounter.id, error = %err, "failed to write encounter history");
        }
    }

    player_service::flush_dirty(state).await;
    report
}

/// Grant row of one contributor. Without a bundle there is nothing to claim, so the row is
/// born claimed and only marks the contributor as distributed.
fn grant_row(
    encounter: &BossEncounter,
    reward: &PlannedReward,
    damage: u64,
    killed_at: SystemTime,
) -> RewardGrantEntity {
    let claimed = reward.bundle.is_none();
    RewardGrantEntity {
        player_id: reward.player_id.clone(),
        encounter_id: encounter.id,
        boss_index: encounter.boss_index,
        rank: reward.rank,
        damage,
        bundle: reward.bundle.clone().map(Into::into).unwrap_or_default(),
        claimed,
        created_at: killed_at,
        claimed_at: claimed.then_some(killed_at),
    }
}

fn credit_progress(state: &SharedState, reward: &PlannedReward) {
    let config = state.config();
    let progress = state.players().get_mut(&reward.player_id).and_then(|mut slot| {
        slot.mutate(|profile| {
            profile.grant_skill_points(reward.sp);
            let progress = profile.apply_experience(reward.xp, &config.leveling, &config.abilities);
            (progress, profile.skill_points)
        })
    });

    match progress {
        Some((progress, skill_points)) if progress.leveled_up() => {
            info!(
                player_id = %reward.player_id,
                level = progress.level,
                unlocked = ?progress.unlocked,
                "player levelled up"
            );
            notify_level_up(state, &reward.player_id, progress, skill_points);
        }
        Some(_) => {}
        None => warn!(
            player_id = %reward.player_id,
            xp = reward.xp,
            "profile not loaded; experience not credited"
        ),
    }
}

fn notify_level_up(
    state: &SharedState,
    player_id: &str,
    progress: LevelProgress,
    skill_points: u64,
) {
    let message = PlayerOutboundMessage::LevelUp(LevelUpPayload {
        previous_level: progress.previous_level,
        level: progress.level,
        unlocked: progress.unlocked,
        skill_points,
    });
    websocket_service::notify_player(state, player_id, &message);
}

fn notify_reward(state: &SharedState, encounter: &BossEncounter, reward: &PlannedReward) {
    let message = PlayerOutboundMessage::RewardGranted(RewardGrantedPayload {
        encounter_id: encounter.id,
        boss_index: encounter.boss_index,
        position: reward.position,
        rank: reward.rank,
        xp: reward.xp,
        sp: reward.sp,
        catch_up_multiplier: reward.catch_up_multiplier,
        bundle: reward.bundle.clone(),
    });
    websocket_service::notify_player(state, &reward.player_id, &message);
}

/// Claim a pending grant in full.
///
/// The claim lock keeps a second concurrent claim out; the conditional claimed-flag update
/// keeps a retried claim from issuing twice.
pub async fn claim_reward(
    state: &SharedState,
    player_id: &str,
    encounter_id: Uuid,
) -> Result<ClaimResponse, ServiceError> {
    let config = state.config();
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let _guard = state.claims().acquire(
        grant_claim_key(player_id, encounter_id),
        now,
        config.runtime.claim_lock_ttl,
    )?;

    player_service::ensure_loaded(state, player_id).await?;

    let grant = store
        .find_reward_grant(player_id.to_string(), encounter_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("no reward for encounter `{encounter_id}`"))
        })?;
    if grant.claimed {
        return Err(ServiceError::StateConflict("reward already claimed".into()));
    }
    if !store
        .mark_grant_claimed(player_id.to_string(), encounter_id)
        .await?
    {
        return Err(ServiceError::StateConflict("reward already claimed".into()));
    }

    let bundle: RewardBundle = grant.bundle.into();
    let profile = state
        .players()
        .get_mut(player_id)
        .and_then(|mut slot| {
            slot.mutate(|profile| {
                profile.credit_bundle(&bundle, now);
                profile.clone()
            })
        })
        .ok_or_else(|| {
            ServiceError::InvariantViolation(format!(
                "profile `{player_id}` unloaded while claiming"
            ))
        })?;

    info!(%player_id, %encounter_id, chests = bundle.chests.total(), "reward claimed");
    if let Err(err) = player_service::flush_player(state, player_id).await {
        warn!(%player_id, error = %err, "failed to flush profile after claim; will retry");
    }

    Ok(ClaimResponse {
        encounter_id,
        bundle,
        currency: profile.currency,
        chests: profile.chests,
    })
}

/// Open one chest of `tier` and credit a random currency amount from the tier's range.
pub async fn open_chest(
    state: &SharedState,
    player_id: &str,
    tier: ChestTier,
) -> Result<ChestOpenedResponse, ServiceError> {
    let config = state.config();
    state.require_store().await?;
    let now = SystemTime::now();
    let _guard = state.claims().acquire(
        chest_claim_key(player_id),
        now,
        config.runtime.claim_lock_ttl,
    )?;

    player_service::ensure_loaded(state, player_id).await?;

    let payout = config
        .rewards
        .payout_for(tier)
        .ok_or_else(|| ServiceError::Validation(format!("no payout configured for {tier:?}")))?;
    let awarded = if payout.max_currency > payout.min_currency {
        rand::rng().random_range(payout.min_currency..=payout.max_currency)
    } else {
        payout.min_currency
    };

    let (currency, chests) = state
        .players()
        .get_mut(player_id)
        .and_then(|mut slot| {
            slot.mutate(|profile| -> Result<_, PlayerError> {
                profile.take_chest(tier)?;
                profile.currency = profile.currency.saturating_add(awarded);
                profile.updated_at = now;
                Ok((profile.currency, profile.chests))
            })
        })
        .ok_or_else(|| ServiceError::StateConflict("profile not loaded".into()))?
        .map_err(ServiceError::from)?;

    debug!(%player_id, ?tier, awarded, "chest opened");
    Ok(ChestOpenedResponse {
        tier,
        currency_awarded: awarded,
        currency,
        chests,
    })
}

/// Pending and claimed grants of a player, newest first.
pub async fn list_rewards(
    state: &SharedState,
    player_id: &str,
) -> Result<PlayerRewardsResponse, ServiceError> {
    let store = state.require_store().await?;
    let grants = store.list_reward_grants(player_id.to_string()).await?;
    Ok(PlayerRewardsResponse {
        player_id: player_id.to_string(),
        pending: grants.iter().filter(|grant| !grant.claimed).count(),
        grants: grants.into_iter().map(RewardGrantSummary::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            encounter_store::{EncounterStore, MemoryStore},
            models::RewardBundleEntity,
        },
        state::{
            AppState,
            participation::{ParticipationTracker, PlayerIdentity},
            rewards::ChestBundle,
        },
    };

    async fn state_with_store() -> (SharedState, MemoryStore) {
        let (state, _inbox) = AppState::new(AppConfig::default());
        let store = MemoryStore::new();
        state.set_encounter_store(Arc::new(store.clone())).await;
        (state, store)
    }

    fn grant(player_id: &str, encounter_id: Uuid) -> RewardGrantEntity {
        RewardGrantEntity {
            player_id: player_id.into(),
            encounter_id,
            boss_index: 1,
            rank: Some(1),
            damage: 300_000,
            bundle: RewardBundleEntity::from(RewardBundle {
                chests: ChestBundle {
                    gold: 1,
                    silver: 2,
                    bronze: 2,
                    wooden: 2,
                },
                currency: Some(600),
                badge: None,
            }),
            claimed: false,
            created_at: SystemTime::now(),
            claimed_at: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_issue_the_grant_once() {
        let (state, store) = state_with_store().await;
        let encounter_id = Uuid::new_v4();
        store.insert_reward_grant(grant("a", encounter_id)).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { claim_reward(&state, "a", encounter_id).await })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, ServiceError::StateConflict(_))),
            }
        }
        assert_eq!(successes, 1);

        let profile = player_service::profile_snapshot(&state, "a").unwrap();
        assert_eq!(profile.chests.gold, 1);
        assert_eq!(profile.chests.total(), 7);
        assert_eq!(profile.currency, 600);
    }

    #[tokio::test]
    async fn claim_conflict_while_lock_is_held() {
        let (state, store) = state_with_store().await;
        let encounter_id = Uuid::new_v4();
        store.insert_reward_grant(grant("a", encounter_id)).await.unwrap();

        let _held = state
            .claims()
            .acquire(
                grant_claim_key("a", encounter_id),
                SystemTime::now(),
                state.config().runtime.claim_lock_ttl,
            )
            .unwrap();
        let err = claim_reward(&state, "a", encounter_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::StateConflict(reason) if reason == "already being processed"));
    }

    #[tokio::test]
    async fn claiming_a_missing_grant_is_not_found() {
        let (state, _store) = state_with_store().await;
        let err = claim_reward(&state, "a", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn claims_require_storage() {
        let (state, _inbox) = AppState::new(AppConfig::default());
        let err = claim_reward(&state, "a", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn opening_a_chest_consumes_it_and_pays_currency() {
        let (state, store) = state_with_store().await;
        let encounter_id = Uuid::new_v4();
        store.insert_reward_grant(grant("a", encounter_id)).await.unwrap();
        claim_reward(&state, "a", encounter_id).await.unwrap();

        let payout = state.config().rewards.payout_for(ChestTier::Gold).cloned().unwrap();
        let opened = open_chest(&state, "a", ChestTier::Gold).await.unwrap();
        assert!(opened.currency_awarded >= payout.min_currency);
        assert!(opened.currency_awarded <= payout.max_currency);
        assert_eq!(opened.chests.gold, 0);
        assert_eq!(opened.currency, 600 + opened.currency_awarded);

        let err = open_chest(&state, "a", ChestTier::Gold).await.unwrap_err();
        assert!(matches!(err, ServiceError::StateConflict(_)));
    }

    #[tokio::test]
    async fn listing_counts_pending_grants() {
        let (state, store) = state_with_store().await;
        let first = Uuid::new_v4();
        store.insert_reward_grant(grant("a", first)).await.unwrap();
        store.insert_reward_grant(grant("a", Uuid::new_v4())).await.unwrap();
        claim_reward(&state, "a", first).await.unwrap();

        let listing = list_rewards(&state, "a").await.unwrap();
        assert_eq!(listing.grants.len(), 2);
        assert_eq!(listing.pending, 1);
    }

    fn contributor(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            player_id: id.into(),
            display_name: id.to_uppercase(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn repeated_distribution_credits_progress_once() {
        let (state, store) = state_with_store().await;
        let config = state.config();
        let now = SystemTime::now();
        let encounter = BossEncounter::spawn(1, config.roster.definition(1), &config, now);

        let mut tracker = ParticipationTracker::new();
        tracker.record_damage(&contributor("a"), 10_000, now);
        tracker.record_damage(&contributor("b"), 1, now);
        let records: Vec<_> = tracker
            .records()
            .cloned()
            .map(|mut record| {
                record.eligible = true;
                record.participation_score = config.participation.full_participation_score;
                record
            })
            .collect();

        let first = distribute(&state, &encounter, &records, now, Some("a".into())).await;
        assert_eq!(first.grants_written, 2);
        assert_eq!(first.grants_duplicate, 0);
        let a_after_first = player_service::profile_snapshot(&state, "a").unwrap();
        let b_after_first = player_service::profile_snapshot(&state, "b").unwrap();
        assert!(a_after_first.xp > 0 || a_after_first.level > 1);
        assert!(a_after_first.skill_points > 0);

        let second = distribute(&state, &encounter, &records, now, Some("a".into())).await;
        assert_eq!(second.grants_written, 0);
        assert_eq!(second.grants_duplicate, 2);
        assert_eq!(player_service::profile_snapshot(&state, "a").unwrap(), a_after_first);
        assert_eq!(player_service::profile_snapshot(&state, "b").unwrap(), b_after_first);

        let below_threshold = list_rewards(&state, "b").await.unwrap();
        assert_eq!(below_threshold.grants.len(), 1);
        assert_eq!(below_threshold.pending, 0);
        let stored = store.find_player("a".into()).await.unwrap().unwrap();
        assert_eq!(stored.xp, a_after_first.xp);
    }
}
