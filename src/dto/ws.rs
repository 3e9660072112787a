use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        encounter::EncounterResponse,
        player::ProfileSummary,
        rewards::{ChestOpenedResponse, ClaimResponse},
        validation::{validate_player_id, validate_raw_hits},
    },
    services::coordinator::{AbilityReceipt, DamageReceipt},
    state::{
        participation::{ActivityEcho, PlayerIdentity},
        rewards::{ChestTier, RewardBundle},
    },
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerInboundMessage {
    /// Must be the first message of a session.
    Identify(IdentifyMessage),
    Damage(DamageMessage),
    Ability { ability_id: String },
    /// Client-measured active time since the previous ping.
    Ping { delta_ms: u64 },
    Claim { encounter_id: Uuid },
    OpenChest { tier: ChestTier },
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Short name used in rejections and logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Identify(_) => "identify",
            Self::Damage(_) => "damage",
            Self::Ability { .. } => "ability",
            Self::Ping { .. } => "ping",
            Self::Claim { .. } => "claim",
            Self::OpenChest { .. } => "open_chest",
            Self::Unknown => "unknown",
        }
    }
}

/// Identity already authenticated by the session layer.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct IdentifyMessage {
    #[validate(custom(function = "validate_player_id"))]
    pub player_id: String,
    #[validate(length(min = 1, max = 32))]
    pub display_name: String,
    #[serde(default)]
    #[validate(url)]
    pub avatar: Option<String>,
}

impl From<IdentifyMessage> for PlayerIdentity {
    fn from(value: IdentifyMessage) -> Self {
        Self {
            player_id: value.player_id,
            display_name: value.display_name,
            avatar: value.avatar,
        }
    }
}

/// Batch of raw tap damage.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct DamageMessage {
    #[validate(custom(function = "validate_raw_hits"))]
    pub amounts: Vec<i64>,
}

impl DamageMessage {
    /// Amounts as unsigned values. Call after validation.
    pub fn unsigned_amounts(&self) -> Vec<u64> {
        self.amounts
            .iter()
            .map(|amount| u64::try_from(*amount).unwrap_or(0))
            .collect()
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerOutboundMessage {
    Welcome(WelcomePayload),
    DamageResult(DamageResultPayload),
    Activity(ActivityPayload),
    RewardGranted(RewardGrantedPayload),
    LevelUp(LevelUpPayload),
    ClaimResult(ClaimResponse),
    ChestOpened(ChestOpenedResponse),
    Rejected(RejectedPayload),
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent once the identify message has been accepted.
pub struct WelcomePayload {
    pub player_id: String,
    pub session_id: Uuid,
    pub degraded: bool,
    /// Missing while storage is unavailable.
    pub profile: Option<ProfileSummary>,
    pub encounter: Option<EncounterResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Outcome of a damage batch or an ability cast.
pub struct DamageResultPayload {
    pub encounter_id: Uuid,
    pub accepted: u64,
    pub overflow: u64,
    /// Hits dropped because the boss died earlier in the batch.
    pub ignored: usize,
    pub killed: bool,
    pub current_health: u64,
    pub max_health: u64,
    pub rage: String,
    pub multiplier: f64,
    /// Informational damage the boss dealt back.
    pub retaliation: u64,
    /// Total damage credited to this player in the encounter.
    pub contribution: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability_id: Option<String>,
    /// Skill points left after the cast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_points: Option<u64>,
}

impl From<DamageReceipt> for DamageResultPayload {
    fn from(value: DamageReceipt) -> Self {
        Self {
            encounter_id: value.encounter_id,
            accepted: value.accepted,
            overflow: value.overflow,
            ignored: value.ignored,
            killed: value.killed,
            current_health: value.current_health,
            max_health: value.max_health,
            rage: value.rage.as_str().to_string(),
            multiplier: value.multiplier,
            retaliation: value.retaliation,
            contribution: value.contribution,
            ability_id: None,
            skill_points: None,
        }
    }
}

impl From<AbilityReceipt> for DamageResultPayload {
    fn from(value: AbilityReceipt) -> Self {
        Self {
            ability_id: Some(value.ability_id),
            skill_points: Some(value.skill_points),
            ..Self::from(value.hit)
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Echo of the player's activity and eligibility after a ping.
pub struct ActivityPayload {
    /// False when the player has not contributed to this encounter yet.
    pub tracked: bool,
    pub eligible: bool,
    pub active_time_ms: u64,
    pub participation_score: u32,
}

impl From<ActivityEcho> for ActivityPayload {
    fn from(value: ActivityEcho) -> Self {
        Self {
            tracked: value.tracked,
            eligible: value.eligible,
            active_time_ms: u64::try_from(value.active_time.as_millis()).unwrap_or(u64::MAX),
            participation_score: value.participation_score,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Pushed after a kill to each contributor.
pub struct RewardGrantedPayload {
    pub encounter_id: Uuid,
    pub boss_index: u32,
    pub position: u32,
    pub rank: Option<u32>,
    pub xp: u64,
    pub sp: u64,
    pub catch_up_multiplier: f64,
    /// Pending grant waiting to be claimed; absent below the negligible damage fraction.
    pub bundle: Option<RewardBundle>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Pushed when kill XP raised the player's level.
pub struct LevelUpPayload {
    pub previous_level: u32,
    pub level: u32,
    /// Abilities unlocked by this level change.
    pub unlocked: Vec<String>,
    pub skill_points: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// User-visible refusal of an inbound message.
pub struct RejectedPayload {
    pub action: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_messages_are_tagged_by_type() {
        let parsed =
            PlayerInboundMessage::from_json_str(r#"{"type":"damage","amounts":[10,20]}"#).unwrap();
        match parsed {
            PlayerInboundMessage::Damage(message) => {
                assert!(message.validate().is_ok());
                assert_eq!(message.unsigned_amounts(), vec![10, 20]);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let parsed =
            PlayerInboundMessage::from_json_str(r#"{"type":"open_chest","tier":"gold"}"#).unwrap();
        assert!(matches!(
            parsed,
            PlayerInboundMessage::OpenChest {
                tier: ChestTier::Gold
            }
        ));

        let parsed = PlayerInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap();
        assert!(matches!(parsed, PlayerInboundMessage::Unknown));
    }

    #[test]
    fn negative_damage_fails_validation() {
        let message = DamageMessage {
            amounts: vec![5, -3],
        };
        assert!(message.validate().is_err());
    }

    #[test]
    fn identify_requires_a_clean_player_id() {
        let message = IdentifyMessage {
            player_id: "has space".into(),
            display_name: "Name".into(),
            avatar: None,
        };
        assert!(message.validate().is_err());

        let message = IdentifyMessage {
            player_id: "p-1".into(),
            display_name: "Name".into(),
            avatar: Some("https://cdn.example.org/a.png".into()),
        };
        assert!(message.validate().is_ok());
    }

    #[test]
    fn outbound_messages_carry_a_snake_case_type() {
        let message = PlayerOutboundMessage::Rejected(RejectedPayload {
            action: "damage".into(),
            reason: "target already defeated".into(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "rejected");
        assert_eq!(value["reason"], "target already defeated");
    }
}
