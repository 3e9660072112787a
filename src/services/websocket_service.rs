use std::time::{Duration, SystemTime};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        encounter::EncounterResponse,
        player::ProfileSummary,
        ws::{
            ActivityPayload, DamageResultPayload, IdentifyMessage, PlayerInboundMessage,
            PlayerOutboundMessage, RejectedPayload, WelcomePayload,
        },
    },
    error::ServiceError,
    services::{player_service, reward_service},
    state::{PlayerConnection, SharedState, participation::PlayerIdentity},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors of a single player session.
///
/// Distinct from `ServiceError`: only a closed writer ends the session, everything else is
/// answered with a `rejected` message.
#[derive(Debug, Error)]
enum SessionError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let identity = match parse_identify(&initial_message) {
        Ok(identity) => identity,
        Err(reason) => {
            warn!(%reason, "player session refused");
            let _ = send_message_to_websocket(&outbound_tx, &rejected("identify", reason));
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    let player_id = identity.player_id.clone();
    let session_id = Uuid::new_v4();

    if let Some(previous) = state.sessions().insert(
        player_id.clone(),
        PlayerConnection {
            session_id,
            player_id: player_id.clone(),
            tx: outbound_tx.clone(),
        },
    ) {
        info!(%player_id, previous_session = %previous.session_id, "closing superseded session");
        let _ = previous.tx.send(Message::Close(None));
    }
    info!(%player_id, %session_id, "player connected");

    if let Err(err) = player_service::ensure_loaded(&state, &player_id).await {
        warn!(%player_id, error = %err, "profile unavailable for new session");
    }

    if send_message_to_websocket(&outbound_tx, &welcome(&state, &player_id, session_id).await)
        .is_err()
    {
        info!(%player_id, "connection closed during welcome, terminating");
        close_session(&state, &player_id, session_id);
        finalize(writer_task, outbound_tx).await;
        return;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%player_id, payload = %text, "received player message");
                let reply = match PlayerInboundMessage::from_json_str(&text) {
                    Ok(inbound) => respond(&state, &identity, inbound).await,
                    Err(err) => {
                        debug!(%player_id, error = %err, "malformed player message");
                        rejected("unknown", "malformed message")
                    }
                };
                if send_message_to_websocket(&outbound_tx, &reply).is_err() {
                    info!(%player_id, "connection closed while replying, terminating");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%player_id, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    close_session(&state, &player_id, session_id);
    info!(%player_id, %session_id, "player disconnected");

    finalize(writer_task, outbound_tx).await;
}

fn parse_identify(raw: &str) -> Result<PlayerIdentity, String> {
    let inbound = PlayerInboundMessage::from_json_str(raw)
        .map_err(|err| format!("malformed message: {err}"))?;
    let PlayerInboundMessage::Identify(message) = inbound else {
        return Err("first message must be identify".into());
    };
    validate_identify(&message)?;
    Ok(message.into())
}

fn validate_identify(message: &IdentifyMessage) -> Result<(), String> {
    message
        .validate()
        .map_err(|err| ServiceError::from(err).to_string())
}

/// Remove the registry entry unless a newer session already replaced it.
fn close_session(state: &SharedState, player_id: &str, session_id: Uuid) {
    state
        .sessions()
        .remove_if(player_id, |_, connection| connection.session_id == session_id);
}

async fn welcome(state: &SharedState, player_id: &str, session_id: Uuid) -> PlayerOutboundMessage {
    let config = state.config();
    let profile = player_service::profile_snapshot(state, player_id)
        .map(|profile| ProfileSummary::from_profile(&profile, &config.leveling, SystemTime::now()));
    let encounter = match state.coordinator().view().await {
        Ok(view) => Some(EncounterResponse::from(view)),
        Err(err) => {
            warn!(error = %err, "encounter view unavailable for welcome");
            None
        }
    };

    PlayerOutboundMessage::Welcome(WelcomePayload {
        player_id: player_id.to_string(),
        session_id,
        degraded: state.is_degraded().await,
        profile,
        encounter,
    })
}

/// Run one inbound message against the services and build the reply.
async fn respond(
    state: &SharedState,
    identity: &PlayerIdentity,
    inbound: PlayerInboundMessage,
) -> PlayerOutboundMessage {
    let action = inbound.action();
    let result = match inbound {
        PlayerInboundMessage::Identify(_) => {
            return rejected(action, "already identified");
        }
        PlayerInboundMessage::Unknown => {
            return rejected(action, "unknown message type");
        }
        PlayerInboundMessage::Damage(message) => match message.validate() {
            Ok(()) => state
                .coordinator()
                .damage(identity.clone(), message.unsigned_amounts())
                .await
                .map(|receipt| PlayerOutboundMessage::DamageResult(receipt.into())),
            Err(err) => Err(err.into()),
        },
        PlayerInboundMessage::Ability { ability_id } => state
            .coordinator()
            .ability(identity.clone(), ability_id)
            .await
            .map(|receipt| PlayerOutboundMessage::DamageResult(DamageResultPayload::from(receipt))),
        PlayerInboundMessage::Ping { delta_ms } => state
            .coordinator()
            .ping(identity.player_id.clone(), Duration::from_millis(delta_ms))
            .await
            .map(|echo| PlayerOutboundMessage::Activity(ActivityPayload::from(echo))),
        PlayerInboundMessage::Claim { encounter_id } => {
            reward_service::claim_reward(state, &identity.player_id, encounter_id)
                .await
                .map(PlayerOutboundMessage::ClaimResult)
        }
        PlayerInboundMessage::OpenChest { tier } => {
            reward_service::open_chest(state, &identity.player_id, tier)
                .await
                .map(PlayerOutboundMessage::ChestOpened)
        }
    };

    result.unwrap_or_else(|err| {
        debug!(player_id = %identity.player_id, action, error = %err, "player action rejected");
        rejected(action, user_reason(&err))
    })
}

/// Short reason shown to the player; internal details stay in the logs.
fn user_reason(err: &ServiceError) -> String {
    match err {
        ServiceError::InvariantViolation(_) => "internal error".into(),
        ServiceError::Persistence(_) | ServiceError::Degraded => "storage unavailable".into(),
        other => other.to_string(),
    }
}

fn rejected(action: &str, reason: impl Into<String>) -> PlayerOutboundMessage {
    PlayerOutboundMessage::Rejected(RejectedPayload {
        action: action.to_string(),
        reason: reason.into(),
    })
}

/// Push a message to the player's live session, if any.
///
/// A closed writer drops the registry entry so later notifications skip it.
pub fn notify_player(state: &SharedState, player_id: &str, message: &PlayerOutboundMessage) {
    let Some((session_id, tx)) = state
        .sessions()
        .get(player_id)
        .map(|connection| (connection.session_id, connection.tx.clone()))
    else {
        debug!(%player_id, "player not connected; notification dropped");
        return;
    };

    if send_message_to_websocket(&tx, message).is_err() {
        warn!(%player_id, "send failed (writer closed), removing player session");
        close_session(state, player_id, session_id);
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; only a closed writer is an error.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), SessionError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| SessionError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
