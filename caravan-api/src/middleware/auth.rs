use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use caravan_core::Actor;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::{AppState, AuthConfig}};

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_CUSTOMER: &str = "CUSTOMER";
pub const ROLE_GUEST: &str = "GUEST";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn actor(&self) -> Actor {
        if self.role == ROLE_ADMIN {
            Actor::admin(self.sub.clone())
        } else {
            Actor::customer(self.sub.clone())
        }
    }
}

pub fn issue_token(auth: &AuthConfig, subject: &str, role: &str) -> Result<String, AppError> {
    let claims = Claims {
        sub: subject.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
}

/// `Ok(None)` without an Authorization header; a header that does not verify is an error.
pub fn actor_from_headers(auth: &AuthConfig, headers: &HeaderMap) -> Result<Option<Actor>, AppError> {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        return Ok(None);
    };

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;

    Ok(Some(token_data.claims.actor()))
}

/// Rejects requests without a valid bearer token and injects the caller's `Actor`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&state.auth, req.headers())?
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}
