use axum::http::{self};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ACCESS_TOKEN_COOKIE: &str = "access_token";
const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub typ: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or invalid authorization header")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("invalid token type")]
    WrongTokenType,

    #[error("invalid token subject")]
    InvalidSubject,
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| AuthError::MissingToken)?;
        let token = auth_str.strip_prefix("Bearer ").ok_or(AuthError::MissingToken)?.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(token.to_string())
    }
    // 2. Try to get token from cookies, browsers can't set headers on a socket handshake
    else {
        let cookie_header = req
            .headers()
            .get(http::header::COOKIE)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::MissingToken)?;

        cookie::Cookie::split_parse(cookie_header)
            .filter_map(|c| c.ok())
            .find(|c| c.name() == ACCESS_TOKEN_COOKIE && !c.value().is_empty())
            .map(|c| c.value().to_string())
            .ok_or(AuthError::MissingToken)
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<TokenClaims>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<TokenClaims>(token, &decoding_key, &validation)
}

/// Resolve the caller's user id from an access token.
pub fn authenticate(token: &str, secret: &str) -> Result<i64, AuthError> {
    let token_data = validate_jwt(token, secret).map_err(|_| AuthError::InvalidToken)?;

    if token_data.claims.typ != ACCESS_TOKEN_TYPE {
        return Err(AuthError::WrongTokenType);
    }

    match token_data.claims.sub.parse::<i64>() {
        Ok(user_id) if user_id > 0 => Ok(user_id),
        _ => Err(AuthError::InvalidSubject),
    }
}

/// Sign a token the way the accounts service does. Only tests mint tokens here.
#[cfg(test)]
pub fn sign_token(sub: &str, typ: &str, ttl_secs: i64, secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = TokenClaims {
        sub: sub.to_string(),
        typ: typ.to_string(),
        iat: now as usize,
        exp: (now + ttl_secs) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
