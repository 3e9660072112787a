//! Read-only projections of the encounter and of player profiles.

use std::time::SystemTime;

use crate::{
    dto::{
        encounter::{EncounterResponse, PreviousEncounterResponse, StandingSummary},
        format_system_time,
        player::ProfileSummary,
    },
    error::ServiceError,
    services::player_service,
    state::{
        SharedState,
        rewards::{damage_percent, is_reward_eligible},
    },
};

/// Current boss, its health and the top of the leaderboard.
pub async fn current_encounter(state: &SharedState) -> Result<EncounterResponse, ServiceError> {
    let view = state.coordinator().view().await?;
    Ok(view.into())
}

/// Final leaderboard of the last resolved kill.
pub async fn previous_encounter(
    state: &SharedState,
) -> Result<PreviousEncounterResponse, ServiceError> {
    let summary = state
        .coordinator()
        .previous()
        .await?
        .ok_or_else(|| ServiceError::NotFound("no boss has been defeated yet".into()))?;
    let fraction = state.config().rewards.negligible_damage_fraction;

    let leaderboard = summary
        .leaderboard
        .into_iter()
        .map(|record| record.migrate())
        .zip(1u32..)
        .map(|(row, position)| StandingSummary {
            position,
            damage_percent: damage_percent(row.damage, summary.total_damage),
            reward_eligible: is_reward_eligible(row.damage, summary.total_damage, fraction),
            player_id: row.player_id,
            display_name: row.display_name,
            avatar: row.avatar,
            damage: row.damage,
            participation_score: row.participation_score,
        })
        .collect();

    Ok(PreviousEncounterResponse {
        encounter_id: summary.encounter_id,
        boss_index: summary.boss_index,
        boss_name: summary.boss_name,
        boss_title: summary.boss_title,
        total_damage: summary.total_damage,
        killed_at: format_system_time(summary.killed_at),
        final_blow: summary.final_blow,
        leaderboard,
    })
}

/// Resource fields of a player, loading the profile if needed.
pub async fn player_profile(
    state: &SharedState,
    player_id: &str,
) -> Result<ProfileSummary, ServiceError> {
    player_service::ensure_loaded(state, player_id).await?;
    let profile = player_service::profile_snapshot(state, player_id)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}` not loaded")))?;
    Ok(ProfileSummary::from_profile(
        &profile,
        &state.config().leveling,
        SystemTime::now(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::encounter_store::MemoryStore,
        dto::encounter::EncounterStatus,
        services::coordinator::Coordinator,
        state::{AppState, participation::PlayerIdentity},
    };

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            player_id: id.into(),
            display_name: id.to_uppercase(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn previous_leaderboard_follows_the_kill() {
        let mut config = AppConfig::default();
        config.dampening.min_multiplier = 1.0;
        config.roster.bosses[0].max_health = 500_000;

        let (state, inbox) = AppState::new(config);
        state
            .set_encounter_store(Arc::new(MemoryStore::new()))
            .await;
        tokio::spawn(Coordinator::restore(state.clone(), inbox).await.run());

        assert!(matches!(
            previous_encounter(&state).await,
            Err(ServiceError::NotFound(_))
        ));

        let coordinator = state.coordinator();
        coordinator.damage(identity("a"), vec![300_000]).await.unwrap();
        coordinator.damage(identity("b"), vec![150_000]).await.unwrap();
        coordinator.damage(identity("c"), vec![50_000]).await.unwrap();

        let current = current_encounter(&state).await.unwrap();
        assert_eq!(current.status, EncounterStatus::Respawning);
        assert!(current.respawn_at.is_some());

        let previous = previous_encounter(&state).await.unwrap();
        assert_eq!(previous.total_damage, 500_000);
        assert_eq!(previous.final_blow.as_deref(), Some("c"));
        let ranks: Vec<_> = previous
            .leaderboard
            .iter()
            .map(|row| (row.position, row.player_id.as_str(), row.damage_percent.round()))
            .collect();
        assert_eq!(ranks, vec![(1, "a", 60.0), (2, "b", 30.0), (3, "c", 10.0)]);
    }
}
