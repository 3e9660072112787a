//! Per-player contribution records and Participation Score accrual.

use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;

use crate::{config::ParticipationConfig, dao::models::LeaderboardV2};

/// Identity attached to inbound events by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    /// Stable id; keys contributions, profiles and sessions.
    pub player_id: String,
    /// Name shown on leaderboards and in the damage feed.
    pub display_name: String,
    /// Avatar URL, if the player set one.
    pub avatar: Option<String>,
}

/// One player's contribution to the current encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct ContributionRecord {
    pub player_id: String,
    /// Name at the time of the last action.
    pub display_name: String,
    pub avatar: Option<String>,
    /// Damage accepted by the encounter for this player.
    pub damage: u64,
    /// Set once accumulated active time reaches the eligibility threshold.
    pub eligible: bool,
    /// Accrued on ticks where the player both dealt damage and is eligible.
    pub participation_score: u32,
    /// Liveness credited from pings, each capped at the configured max delta.
    pub active_time: Duration,
    /// Last damage or ability; drives the activity window.
    pub last_action_at: SystemTime,
    /// Server time of the previous ping, or of record creation. Bounds the next credit.
    pub last_ping_at: SystemTime,
    /// Damage total observed at the previous accrual tick.
    pub last_damage_snapshot: u64,
    /// Ability ids cast during this encounter.
    pub abilities_used: BTreeSet<String>,
}

impl ContributionRecord {
    fn new(identity: &PlayerIdentity, now: SystemTime) -> Self {
        Self {
            player_id: identity.player_id.clone(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            damage: 0,
            eligible: false,
            participation_score: 0,
            active_time: Duration::ZERO,
            last_action_at: now,
            last_ping_at: now,
            last_damage_snapshot: 0,
            abilities_used: BTreeSet::new(),
        }
    }

    /// Whether the last action falls inside the rolling activity window.
    pub fn is_recent(&self, now: SystemTime, window: Duration) -> bool {
        match now.duration_since(self.last_action_at) {
            Ok(idle) => idle <= window,
            // Clock went backwards; the action is as recent as it gets.
            Err(_) => true,
        }
    }
}

/// Echo returned to a player after a liveness ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEcho {
    /// False when the player has no record yet.
    pub tracked: bool,
    pub eligible: bool,
    /// Credited active time so far.
    pub active_time: Duration,
    pub participation_score: u32,
}

/// Outcome of one accrual tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Players whose score went up this tick.
    pub accrued: Vec<String>,
    /// Players already at the cap.
    pub capped: usize,
    /// Eligible players skipped for being idle.
    pub idle: usize,
    /// Players that have not reached the eligibility threshold.
    pub ineligible: usize,
}

/// Contribution records of the active encounter, in first-contribution order.
#[derive(Debug, Clone, Default)]
pub struct ParticipationTracker {
    records: IndexMap<String, ContributionRecord>,
}

impl ParticipationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, keeping their order.
    pub fn from_records(records: impl IntoIterator<Item = ContributionRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.player_id.clone(), record))
                .collect(),
        }
    }

    fn touch(&mut self, identity: &PlayerIdentity, now: SystemTime) -> &mut ContributionRecord {
        let record = self
            .records
            .entry(identity.player_id.clone())
            .or_insert_with(|| ContributionRecord::new(identity, now));
        record.display_name.clone_from(&identity.display_name);
        record.avatar.clone_from(&identity.avatar);
        record.last_action_at = now;
        record
    }

    /// Credit accepted damage, creating the record on first contact.
    pub fn record_damage(
        &mut self,
        identity: &PlayerIdentity,
        damage: u64,
        now: SystemTime,
    ) -> &ContributionRecord {
        let record = self.touch(identity, now);
        record.damage = record.damage.saturating_add(damage);
        record
    }

    /// Credit an ability cast and its accepted damage.
    pub fn record_ability(
        &mut self,
        identity: &PlayerIdentity,
        ability_id: &str,
        damage: u64,
        now: SystemTime,
    ) -> &ContributionRecord {
        let record = self.touch(identity, now);
        record.damage = record.damage.saturating_add(damage);
        record.abilities_used.insert(ability_id.to_string());
        record
    }

    /// Credit client-reported liveness. Unknown players are not tracked until they act.
    ///
    /// The credit never exceeds the configured max delta nor the server time elapsed since
    /// the previous ping.
    pub fn record_ping(
        &mut self,
        player_id: &str,
        reported: Duration,
        now: SystemTime,
        config: &ParticipationConfig,
    ) -> ActivityEcho {
        let Some(record) = self.records.get_mut(player_id) else {
            return ActivityEcho {
                tracked: false,
                eligible: false,
                active_time: Duration::ZERO,
                participation_score: 0,
            };
        };

        let elapsed = now
            .duration_since(record.last_ping_at)
            .unwrap_or(Duration::ZERO);
        record.active_time += reported.min(config.max_ping_delta).min(elapsed);
        record.last_ping_at = record.last_ping_at.max(now);
        if record.active_time >= config.eligibility_threshold {
            record.eligible = true;
        }

        ActivityEcho {
            tracked: true,
            eligible: record.eligible,
            active_time: record.active_time,
            participation_score: record.participation_score,
        }
    }

    /// Accrue one point for every eligible, recently active player below the cap.
    pub fn tick(&mut self, now: SystemTime, config: &ParticipationConfig) -> TickSummary {
        let mut summary = TickSummary::default();
        for record in self.records.values_mut() {
            if !record.eligible {
                summary.ineligible += 1;
            } else if record.participation_score >= config.score_cap {
                summary.capped += 1;
            } else if !record.is_recent(now, config.activity_window) {
                summary.idle += 1;
            } else {
                record.participation_score += 1;
                summary.accrued.push(record.player_id.clone());
            }
            record.last_damage_snapshot = record.damage;
        }
        summary
    }

    /// Record of one player, if they contributed.
    pub fn get(&self, player_id: &str) -> Option<&ContributionRecord> {
        self.records.get(player_id)
    }

    /// Records in first-contribution order.
    pub fn records(&self) -> impl Iterator<Item = &ContributionRecord> {
        self.records.values()
    }

    /// Number of contributors.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Saturating sum of every contributor's damage.
    pub fn total_damage(&self) -> u64 {
        self.records
            .values()
            .fold(0u64, |total, record| total.saturating_add(record.damage))
    }

    /// Drop every record; called when a new encounter starts.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl From<LeaderboardV2> for ContributionRecord {
    fn from(value: LeaderboardV2) -> Self {
        Self {
            player_id: value.player_id,
            display_name: value.display_name,
            avatar: value.avatar,
            damage: value.damage,
            eligible: value.eligible,
            participation_score: value.participation_score,
            active_time: Duration::from_millis(value.active_time_ms),
            last_action_at: value.last_action_at,
            last_ping_at: value.last_ping_at.unwrap_or(value.last_action_at),
            last_damage_snapshot: value.last_damage_snapshot,
            abilities_used: value.abilities_used.into_iter().collect(),
        }
    }
}

impl From<&ContributionRecord> for LeaderboardV2 {
    fn from(value: &ContributionRecord) -> Self {
        Self {
            player_id: value.player_id.clone(),
            display_name: value.display_name.clone(),
            avatar: value.avatar.clone(),
            damage: value.damage,
            eligible: value.eligible,
            participation_score: value.participation_score,
            active_time_ms: value.active_time.as_millis().min(u64::MAX as u128) as u64,
            last_action_at: value.last_action_at,
            last_ping_at: Some(value.last_ping_at),
            last_damage_snapshot: value.last_damage_snapshot,
            abilities_used: value.abilities_used.iter().cloned().collect(),
        }
    }
}
