use serde::Serialize;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::{
    dto::sse::{
        BossFinishedEvent, BossHealthEvent, BossKilledEvent, BossRespawnedEvent,
        DamageFeedEntry, DamageFeedEvent, ServerEvent, SystemStatus,
    },
    state::SharedState,
};

const EVENT_BOSS_HEALTH: &str = "boss.health";
const EVENT_DAMAGE_FEED: &str = "boss.damage_feed";
const EVENT_BOSS_KILLED: &str = "boss.killed";
const EVENT_BOSS_RESPAWNED: &str = "boss.respawned";
const EVENT_BOSS_FINISHED: &str = "boss.finished";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the boss health and rage tier.
pub fn broadcast_boss_health(state: &SharedState, payload: &BossHealthEvent) {
    send_public_event(state, EVENT_BOSS_HEALTH, payload, true);
}

/// Broadcast the damage accepted since the previous health tick.
pub fn broadcast_damage_feed(state: &SharedState, encounter_id: Uuid, entries: Vec<DamageFeedEntry>) {
    let payload = DamageFeedEvent {
        encounter_id,
        entries,
    };
    send_public_event(state, EVENT_DAMAGE_FEED, &payload, false);
}

/// Announce a resolved kill.
pub fn broadcast_boss_killed(state: &SharedState, payload: &BossKilledEvent) {
    send_public_event(state, EVENT_BOSS_KILLED, payload, true);
}

/// Announce the next boss. The kill announcement is no longer replayed.
pub fn broadcast_boss_respawned(state: &SharedState, payload: &BossRespawnedEvent) {
    state.public_events().forget(EVENT_BOSS_KILLED);
    send_public_event(state, EVENT_BOSS_RESPAWNED, payload, true);
}

pub fn broadcast_boss_finished(state: &SharedState, payload: &BossFinishedEvent) {
    send_public_event(state, EVENT_BOSS_FINISHED, payload, true);
}

/// Broadcast a degraded-mode transition.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_public_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded }, true);
}

fn send_public_event(state: &SharedState, name: &str, payload: &impl Serialize, retain: bool) {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => {
            let receivers = state.public_events().publish(event, retain);
            trace!(event = name, receivers, "public event sent");
        }
        Err(err) => warn!(event = name, error = %err, "failed to serialize public SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn events_reach_public_subscribers_with_their_name() {
        let (state, _inbox) = AppState::new(AppConfig::default());
        let mut receiver = state.public_events().subscribe();

        broadcast_damage_feed(
            &state,
            Uuid::nil(),
            vec![DamageFeedEntry {
                player_id: "a".into(),
                display_name: "A".into(),
                damage: 42,
                ability: None,
            }],
        );
        broadcast_system_status(&state, true);

        let feed = receiver.recv().await.unwrap();
        assert_eq!(feed.event.as_deref(), Some("boss.damage_feed"));
        let body: serde_json::Value = serde_json::from_str(&feed.data).unwrap();
        assert_eq!(body["entries"][0]["damage"], 42);
        assert!(body["entries"][0].get("ability").is_none());

        let status = receiver.recv().await.unwrap();
        assert_eq!(status.event.as_deref(), Some("system.status"));
        assert_eq!(status.data, r#"{"degraded":true}"#);

        let replay: Vec<_> = state
            .public_events()
            .retained()
            .into_iter()
            .filter_map(|event| event.event)
            .collect();
        assert_eq!(replay, vec!["system.status"]);
    }
}
