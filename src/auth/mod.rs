/*!
 * # Request ownership
 *
 * Every cart, order and payment belongs to an owner: either an authenticated
 * user (HS256 bearer token) or an anonymous shopper identified by the
 * `x-session-id` header. Services key rows by `Owner::key()`.
 */

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

pub const SESSION_HEADER: &str = "x-session-id";
const MAX_SESSION_LEN: usize = 128;

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub iat: i64,
    pub exp: i64,
}

/// Who a cart, order or payment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    User(Uuid),
    Session(String),
}

impl Owner {
    /// Storage key, e.g. `user:<uuid>` or `session:<token>`.
    pub fn key(&self) -> String {
        match self {
            Owner::User(id) => format!("user:{}", id),
            Owner::Session(token) => format!("session:{}", token),
        }
    }

    /// Short, stable tag embedded in generated references.
    pub fn tag(&self) -> String {
        match self {
            Owner::User(id) => id.simple().to_string()[..8].to_string(),
            Owner::Session(token) => {
                let digest = Sha256::digest(token.as_bytes());
                hex::encode(digest)[..8].to_string()
            }
        }
    }

    /// Parses a storage key back into an owner.
    pub fn from_key(key: &str) -> Option<Owner> {
        if let Some(raw) = key.strip_prefix("user:") {
            return Uuid::parse_str(raw).ok().map(Owner::User);
        }
        key.strip_prefix("session:")
            .filter(|token| is_valid_session_token(token))
            .map(|token| Owner::Session(token.to_string()))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn is_valid_session_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_SESSION_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Issues a bearer token for `user_id`, valid for `ttl_secs`.
pub fn issue_token(secret: &str, user_id: Uuid, ttl_secs: i64) -> Result<String, ServiceError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
}

/// Validates a bearer token and returns the user it was issued for.
pub fn validate_token(secret: &str, token: &str) -> Result<Uuid, ServiceError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ServiceError::Unauthorized("token expired".to_string())
        }
        _ => ServiceError::Unauthorized("invalid token".to_string()),
    })?
    .claims;

    Uuid::parse_str(&claims.sub)
        .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))
}

/// Resolves the owner from request headers. A bearer token wins over a session id.
pub fn owner_from_headers(headers: &HeaderMap, jwt_secret: &str) -> Result<Owner, ServiceError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| ServiceError::Unauthorized("malformed authorization header".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| ServiceError::Unauthorized("expected a bearer token".into()))?;
        return validate_token(jwt_secret, token).map(Owner::User);
    }

    if let Some(value) = headers.get(SESSION_HEADER) {
        let token = value.to_str().unwrap_or_default().trim();
        if is_valid_session_token(token) {
            return Ok(Owner::Session(token.to_string()));
        }
        return Err(ServiceError::Unauthorized("invalid session id".into()));
    }

    Err(ServiceError::Unauthorized(
        "authentication or session id required".into(),
    ))
}

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        owner_from_headers(&parts.headers, &state.config.jwt_secret)
    }
}
