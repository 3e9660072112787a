use serde::Serialize;
use utoipa::ToSchema;

/// Response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Current boss index, when the coordinator answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boss_index: Option<u32>,
}

impl HealthResponse {
    /// Storage reachable.
    pub fn ok(boss_index: Option<u32>) -> Self {
        Self {
            status: "ok".to_string(),
            boss_index,
        }
    }

    /// Running without storage.
    pub fn degraded(boss_index: Option<u32>) -> Self {
        Self {
            status: "degraded".to_string(),
            boss_index,
        }
    }

    /// Whether storage is currently unavailable.
    pub fn is_degraded(&self) -> bool {
        self.status == "degraded"
    }
}
