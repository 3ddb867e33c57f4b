use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{debug, error, warn};

use crate::models::{error_response, ErrorResponse};
use crate::services::auth_service::{authenticate, get_auth_token};
use crate::state::{AppState, AuthUser};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {

    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(e) => return Err(error_response(StatusCode::UNAUTHORIZED, e.to_string())),
    };

    // 2. Validate Token
    let secret = match &state.jwt_secret {
        Some(secret) => secret,
        None => {
            error!("JWT secret not configured");
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "JWT secret not configured",
            ));
        }
    };
    let user_id = match authenticate(&token, secret) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("Token rejected for {}: {}", req.uri().path(), e);
            return Err(error_response(StatusCode::UNAUTHORIZED, e.to_string()));
        }
    };

    // 3. Set the caller into request extensions for downstream handlers
    debug!("User {} authenticated", user_id);
    req.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(req).await)
}
