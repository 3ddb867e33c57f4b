use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Store reachable and hub running", body = HealthResponse),
        (status = 503, description = "Store unavailable", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Realtime diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Hub and process statistics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Open the realtime session for a note.
///
/// Upgrades to a websocket carrying JSON text frames. Clients send
/// `{"type":"patch","noteId"?,"patch","version"}`; the server sends `patch`,
/// `presence` and `error` frames.
#[utoipa::path(
    get,
    path = "/api/v1/ws/notes/{id}",
    params(
        ("id" = i64, Path, description = "Note id")
    ),
    responses(
        (status = 101, description = "Switching to the websocket protocol"),
        (status = 400, description = "Malformed note id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Caller is neither owner nor collaborator", body = ErrorResponse),
        (status = 404, description = "Note not found", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn note_ws_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        note_ws_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
