use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub mod encounter;
pub mod health;
pub mod live;
pub mod players;

/// Full application router, Swagger UI included.
pub fn router(state: SharedState) -> Router<()> {
    Router::<SharedState>::new()
        .merge(health::router())
        .merge(live::router())
        .merge(encounter::router())
        .merge(players::router())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
}
