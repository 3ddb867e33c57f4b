use crate::{
    handlers::{diagnostics, health_check, ready_check},
    routes::auth_middleware::auth_middleware,
    state::AppState,
    ws::handler::note_ws,
};
use axum::{middleware, routing::get, Router};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let authenticated = Router::<AppState>::new()
        .route("/v1/ws/notes/:id", get(note_ws))
        .route("/v1/diagnostics", get(diagnostics))
        // Applies to all routes added above
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::<AppState>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(authenticated)
        .with_state(state)
}
