use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::{verify_jwt, AccountRole, Claims};
use crate::error::ApiError;

/// Authenticated caller extracted from the bearer token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
    pub role: AccountRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self { username: claims.sub, role: claims.role }
    }
}

/// JWT authentication middleware that validates tokens and extracts the caller
pub async fn jwt_auth_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;

    let claims = verify_jwt(&token).map_err(|e| ApiError::unauthorized(e.to_string()))?;

    request.extensions_mut().insert(AuthUser::from(claims));

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers.get("authorization").ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
