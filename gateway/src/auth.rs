//! Bearer-token authentication for the donation endpoint.
//!
//! The gateway trusts the auth service's HS256-signed JWTs and extracts the
//! caller's identity from them. Token *issuance* is the auth service's job;
//! only verification lives here.

use crate::error::AppError;
use crate::state::AppState;
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use fundflow_core::{DomainError, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by the auth service's tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user's id.
    #[serde(rename = "userId")]
    pub user_id: i64,
    /// The authenticated user's email.
    pub email: String,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

/// Verifies bearer tokens; shared by all request handlers.
#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
}

impl JwtVerifier {
    /// Build a verifier for HS256 tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    /// Validate a raw token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TokenExpired`] for expired tokens and
    /// [`DomainError::TokenInvalid`] for anything else the decoder rejects.
    pub fn verify(&self, token: &str) -> Result<Claims, DomainError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &self.key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => DomainError::TokenExpired,
                _ => DomainError::TokenInvalid,
            })
    }
}

/// The verified identity of the calling user.
///
/// Extracting this from a request performs the full bearer-token check;
/// handlers that take an `AuthenticatedUser` cannot run unauthenticated.
///
/// # Example
///
/// ```ignore
/// async fn handler(caller: AuthenticatedUser) -> String {
///     format!("hello {}", caller.email)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The caller's user id.
    pub user_id: UserId,
    /// The caller's email.
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    JwtVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(DomainError::Unauthenticated)?;

        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or(DomainError::Unauthenticated)?;

        let verifier = JwtVerifier::from_ref(state);
        let claims = verifier.verify(token).inspect_err(|err| {
            tracing::warn!(error = %err, "Rejected credential");
        })?;

        Ok(Self {
            user_id: UserId(claims.user_id),
            email: claims.email,
        })
    }
}

impl FromRef<AppState> for JwtVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp_offset: i64) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        let claims = Claims {
            user_id: 42,
            email: "donor@example.com".to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_a_valid_token() {
        let verifier = JwtVerifier::new("devsecret");
        let claims = verifier.verify(&token("devsecret", 3600)).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.email, "donor@example.com");
    }

    #[test]
    fn rejects_an_expired_token() {
        let verifier = JwtVerifier::new("devsecret");
        let err = verifier.verify(&token("devsecret", -3600)).unwrap_err();
        assert_eq!(err, DomainError::TokenExpired);
    }

    #[test]
    fn rejects_a_token_signed_with_the_wrong_secret() {
        let verifier = JwtVerifier::new("devsecret");
        let err = verifier.verify(&token("other", 3600)).unwrap_err();
        assert_eq!(err, DomainError::TokenInvalid);
    }

    #[test]
    fn rejects_garbage() {
        let verifier = JwtVerifier::new("devsecret");
        assert_eq!(verifier.verify("not-a-jwt").unwrap_err(), DomainError::TokenInvalid);
    }
}
