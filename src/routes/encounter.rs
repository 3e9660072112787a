use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::encounter::{EncounterResponse, PreviousEncounterResponse},
    error::AppError,
    services::encounter_service,
    state::SharedState,
};

/// Read-only encounter endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/encounter", get(get_encounter))
        .route("/encounter/previous", get(get_previous_encounter))
}

#[utoipa::path(
    get,
    path = "/encounter",
    tag = "encounter",
    responses((status = 200, description = "Current boss and leaderboard", body = EncounterResponse))
)]
/// Return the current boss, its health and the top contributors.
pub async fn get_encounter(
    State(state): State<SharedState>,
) -> Result<Json<EncounterResponse>, AppError> {
    let payload = encounter_service::current_encounter(&state).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/encounter/previous",
    tag = "encounter",
    responses(
        (status = 200, description = "Final leaderboard of the last kill", body = PreviousEncounterResponse),
        (status = 404, description = "No boss defeated yet")
    )
)]
/// Return the final leaderboard of the last defeated boss.
pub async fn get_previous_encounter(
    State(state): State<SharedState>,
) -> Result<Json<PreviousEncounterResponse>, AppError> {
    let payload = encounter_service::previous_encounter(&state).await?;
    Ok(Json(payload))
}
