pub mod api;
pub mod auth_middleware;

use axum::{http::HeaderValue, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::state::AppState;

pub use api::create_api_routes;

/// Assemble the full application router
pub fn create_app(state: AppState, config: &Config) -> Router {
    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(config)),
        )
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{}'", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
        }
        None if config.is_development() => CorsLayer::permissive(),
        None => CorsLayer::new(),
    }
}
