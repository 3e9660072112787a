use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::rewards::ChestBundle;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Periodic health and rage broadcast while the boss is alive.
pub struct BossHealthEvent {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub current_health: u64,
    pub max_health: u64,
    pub health_percent: f64,
    pub rage: String,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Damage accepted for one player since the previous broadcast.
pub struct DamageFeedEntry {
    pub player_id: String,
    pub display_name: String,
    pub damage: u64,
    /// Ability id when the hit came from a special ability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Batch of damage notifications.
pub struct DamageFeedEvent {
    pub encounter_id: Uuid,
    pub entries: Vec<DamageFeedEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Kill announcement.
pub struct BossKilledEvent {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub boss_name: String,
    /// Display name of the player who landed the final blow.
    pub final_blow: Option<String>,
    /// Display name of the top damage dealer.
    pub top_damage: Option<String>,
    pub total_damage: u64,
    pub participants: usize,
    /// Chests handed out across all contributors.
    pub prizes: ChestBundle,
    pub respawn_at: String,
    pub respawn_in_secs: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// A new boss entered the arena.
pub struct BossRespawnedEvent {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub boss_name: String,
    pub boss_title: String,
    pub max_health: u64,
    pub target_end_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// The roster is exhausted; no boss will spawn anymore.
pub struct BossFinishedEvent {
    pub boss_index: u32,
    pub finished_at: String,
}
