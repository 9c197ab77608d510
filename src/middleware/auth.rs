//! Authentication middleware
//!
//! Operator identity lives in an external provider; requests arrive with a
//! JWT it issued (HS256, shared secret). This middleware only verifies the
//! token and extracts the caller's account scope and role.

use axum::{
    extract::{State, Request},
    middleware::Next,
    response::Response,
    http::header::AUTHORIZATION,
};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, AppError};

/// Claims issued by the identity provider
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // User ID
    pub account: String,  // Account ID
    pub role: String,     // Operator role
    pub exp: usize,       // Expiration timestamp
    pub iat: usize,       // Issued at
}

/// Operator context extracted from JWT
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub role: String,
}

impl UserContext {
    /// Check if the caller holds an administrative role
    pub fn is_admin(&self) -> bool {
        matches!(self.role.as_str(), "super_admin" | "admin")
    }
}

/// RBAC: Require an administrative role
/// Use this instead of inline `if !user.is_admin()` checks
pub fn require_admin(user: &UserContext) -> Result<(), AppError> {
    if !user.is_admin() {
        tracing::warn!("Admin required but user {} has role '{}'", user.user_id, user.role);
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Middleware: Require operator JWT authentication
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default()
    ).map_err(|_| AppError::TokenInvalid)?;

    let claims = token_data.claims;

    let user_ctx = UserContext {
        user_id: Uuid::parse_str(&claims.sub).map_err(|_| AppError::TokenInvalid)?,
        account_id: Uuid::parse_str(&claims.account).map_err(|_| AppError::TokenInvalid)?,
        role: claims.role,
    };

    req.extensions_mut().insert(user_ctx);

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req.headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    if !auth_header.starts_with("Bearer ") {
        return Err(AppError::Unauthorized);
    }

    Ok(auth_header[7..].to_string())
}

// Implement FromRequestParts for UserContext
#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: &str) -> UserContext {
        UserContext {
            user_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            role: role.to_string(),
        }
    }

    #[test]
    fn admin_roles() {
        assert!(ctx("super_admin").is_admin());
        assert!(ctx("admin").is_admin());
        assert!(!ctx("operator").is_admin());
        assert!(!ctx("viewer").is_admin());
    }

    #[test]
    fn require_admin_rejects_non_admins() {
        assert!(require_admin(&ctx("admin")).is_ok());
        assert!(require_admin(&ctx("viewer")).is_err());
    }
}
