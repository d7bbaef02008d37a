// =============================================================================
// AUTH MODULE
// =============================================================================
// Resolves `Authorization: Bearer <jwt>` into a `Caller`.
//
// Tokens are issued elsewhere (the user service); this service only verifies
// the HS256 signature and expiry and reads two claims:
// - id:   the user's UUID
// - role: "admin" or "user" (missing means "user")
//
// EXTRACTORS:
// - Caller       any signed-in user, 401 otherwise
// - AdminCaller  signed-in admin, 403 for everyone else
// =============================================================================

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Caller, Role};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token subject is not a valid user id")]
    InvalidSubject,
}

/// Verifies bearer tokens with the shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;

        let user_id = Uuid::parse_str(&data.claims.id).map_err(|_| AuthError::InvalidSubject)?;
        let role = match data.claims.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };
        Ok(Caller { user_id, role })
    }

    /// Verifies the value of an `Authorization` header.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Caller, AuthError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(*caller);
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match state.jwt.verify_header(header) {
            Ok(caller) => {
                parts.extensions.insert(caller);
                Ok(caller)
            }
            Err(e) => {
                tracing::warn!(uri = %parts.uri, error = %e, "Rejected unauthenticated request");
                Err(AppError::Unauthorized(e.to_string()))
            }
        }
    }
}

/// A caller with the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller(pub Caller);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_admin() {
            tracing::warn!(user_id = %caller.user_id, uri = %parts.uri, "Admin access denied");
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminCaller(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(id: &str, role: Option<&str>, exp_offset: i64) -> String {
        let claims = Claims {
            id: id.to_string(),
            role: role.map(str::to_string),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token encodes")
    }

    #[test]
    fn valid_token_resolves_caller() {
        let verifier = JwtVerifier::new(SECRET);
        let user_id = Uuid::new_v4();

        let caller = verifier
            .verify_header(Some(&format!("Bearer {}", token(&user_id.to_string(), None, 3600))))
            .unwrap();
        assert_eq!(caller, Caller { user_id, role: Role::User });

        let admin = verifier
            .verify(&token(&user_id.to_string(), Some("admin"), 3600))
            .unwrap();
        assert!(admin.is_admin());
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let id = Uuid::new_v4().to_string();

        assert_eq!(verifier.verify_header(None), Err(AuthError::MissingToken));
        assert_eq!(verifier.verify_header(Some("Basic abc")), Err(AuthError::MissingToken));
        assert_eq!(verifier.verify(&token(&id, None, -3600)), Err(AuthError::Expired));
        assert_eq!(verifier.verify(&token("not-a-uuid", None, 3600)), Err(AuthError::InvalidSubject));

        let other = JwtVerifier::new("another-secret");
        assert_eq!(other.verify(&token(&id, None, 3600)), Err(AuthError::InvalidToken));
    }
}
