use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the world boss backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::live::public_stream,
        crate::routes::live::player_socket,
        crate::routes::encounter::get_encounter,
        crate::routes::encounter::get_previous_encounter,
        crate::routes::players::get_profile,
        crate::routes::players::list_rewards,
        crate::routes::players::claim_reward,
        crate::routes::players::open_chest,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::encounter::EncounterResponse,
            crate::dto::encounter::PreviousEncounterResponse,
            crate::dto::player::ProfileSummary,
            crate::dto::rewards::PlayerRewardsResponse,
            crate::dto::rewards::ClaimResponse,
            crate::dto::rewards::ChestOpenedResponse,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::BossHealthEvent,
            crate::dto::sse::DamageFeedEvent,
            crate::dto::sse::BossKilledEvent,
            crate::dto::sse::BossRespawnedEvent,
            crate::dto::sse::BossFinishedEvent,
            crate::state::rewards::ChestTier,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "encounter", description = "Current and previous boss encounters"),
        (name = "players", description = "Player sessions, rewards and chests"),
    )
)]
pub struct ApiDoc;
