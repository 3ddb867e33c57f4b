use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness/readiness probe body
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    /// Open realtime rooms, only reported by the readiness probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<u32>,
}
