use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountRole {
    Admin,
    User,
}

/// Bearer token payload; `sub` is the username.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: AccountRole,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(username: impl Into<String>, role: AccountRole, valid_for: Duration) -> Self {
        let now = Utc::now();
        Self { sub: username.into(), role, exp: (now + valid_for).timestamp(), iat: now.timestamp() }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
}

fn secret() -> Result<&'static [u8], JwtError> {
    let secret = &config::config().security.jwt_secret;
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    Ok(secret.as_bytes())
}

/// Sign claims with the configured secret. Token issuance lives with the
/// credential service; this is used by tooling and tests.
pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret()?)).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn verify_jwt(token: &str) -> Result<Claims, JwtError> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret()?), &Validation::default())
        .map_err(|e| JwtError::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}
