use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        player::ProfileSummary,
        rewards::{ChestOpenedResponse, ClaimResponse, PlayerRewardsResponse},
        validation::validate_player_id,
    },
    error::AppError,
    services::{encounter_service, reward_service},
    state::{SharedState, rewards::ChestTier},
};

/// Player resources, reward grants and chests.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/players/{id}", get(get_profile))
        .route("/players/{id}/rewards", get(list_rewards))
        .route(
            "/players/{id}/rewards/{encounter_id}/claim",
            post(claim_reward),
        )
        .route("/players/{id}/chests/{tier}/open", post(open_chest))
}

fn checked_player_id(id: &str) -> Result<(), AppError> {
    validate_player_id(id).map_err(|err| {
        AppError::BadRequest(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| "invalid player id".into()),
        )
    })
}

#[utoipa::path(
    get,
    path = "/players/{id}",
    tag = "players",
    params(("id" = String, Path, description = "Player id")),
    responses(
        (status = 200, description = "Player resources", body = ProfileSummary),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Return level, XP, skill points, currency, chests and badges of a player.
pub async fn get_profile(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileSummary>, AppError> {
    checked_player_id(&id)?;
    let payload = encounter_service::player_profile(&state, &id).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/players/{id}/rewards",
    tag = "players",
    params(("id" = String, Path, description = "Player id")),
    responses(
        (status = 200, description = "Reward grants of the player", body = PlayerRewardsResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// List pending and claimed reward grants.
pub async fn list_rewards(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PlayerRewardsResponse>, AppError> {
    checked_player_id(&id)?;
    let payload = reward_service::list_rewards(&state, &id).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    post,
    path = "/players/{id}/rewards/{encounter_id}/claim",
    tag = "players",
    params(
        ("id" = String, Path, description = "Player id"),
        ("encounter_id" = Uuid, Path, description = "Encounter the grant was issued for")
    ),
    responses(
        (status = 200, description = "Grant credited", body = ClaimResponse),
        (status = 404, description = "No grant for this encounter"),
        (status = 409, description = "Already claimed or being processed"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Claim a pending reward grant in full.
pub async fn claim_reward(
    State(state): State<SharedState>,
    Path((id, encounter_id)): Path<(String, Uuid)>,
) -> Result<Json<ClaimResponse>, AppError> {
    checked_player_id(&id)?;
    let payload = reward_service::claim_reward(&state, &id, encounter_id).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    post,
    path = "/players/{id}/chests/{tier}/open",
    tag = "players",
    params(
        ("id" = String, Path, description = "Player id"),
        ("tier" = ChestTier, Path, description = "Chest tier to open")
    ),
    responses(
        (status = 200, description = "Chest opened", body = ChestOpenedResponse),
        (status = 409, description = "No chest of this tier or already being processed"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Open one chest and credit its currency.
pub async fn open_chest(
    State(state): State<SharedState>,
    Path((id, tier)): Path<(String, ChestTier)>,
) -> Result<Json<ChestOpenedResponse>, AppError> {
    checked_player_id(&id)?;
    let payload = reward_service::open_chest(&state, &id, tier).await?;
    Ok(Json(payload))
}
