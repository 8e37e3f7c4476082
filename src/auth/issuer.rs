use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::user::User;
use crate::store::UserStore;

/// Fresh access/refresh pair minted on every successful sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Claims embedded in the tokens this service mints.
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    /// User email (the identity key).
    sub: String,
    iss: String,
    /// "access" or "refresh".
    token_type: String,
    iat: i64,
    exp: i64,
    /// Unique per token, so two pairs for the same user never collide.
    jti: String,
}

/// Mints and validates session tokens (HS256).
///
/// Revocation is out of scope here; tokens stay valid until expiry.
pub struct SessionIssuer {
    secret: String,
    issuer: String,
    access_lifetime_secs: u64,
    refresh_lifetime_secs: u64,
}

impl SessionIssuer {
    pub fn new(
        secret: &str,
        issuer: &str,
        access_lifetime_secs: u64,
        refresh_lifetime_secs: u64,
    ) -> Self {
        Self {
            secret: secret.to_string(),
            issuer: issuer.to_string(),
            access_lifetime_secs,
            refresh_lifetime_secs,
        }
    }

    /// Issue a brand-new token pair for a resolved user.
    pub fn issue_for_user(&self, user: &User) -> Result<TokenPair, AuthError> {
        if user.email.is_empty() {
            return Err(AuthError::IdentityRequired);
        }
        Ok(TokenPair {
            access: self.mint(&user.email, "access", self.access_lifetime_secs)?,
            refresh: self.mint(&user.email, "refresh", self.refresh_lifetime_secs)?,
        })
    }

    /// Convenience path: resolve an email to an existing user and issue a
    /// pair. Never creates a user.
    pub fn issue_for_email(
        &self,
        email: &str,
        store: &dyn UserStore,
    ) -> Result<TokenPair, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::IdentityRequired);
        }
        let user = store
            .find_by_email(&email)
            .map_err(|e| AuthError::Database(e.to_string()))?
            .ok_or(AuthError::UserNotFound)?;
        self.issue_for_user(&user)
    }

    fn mint(&self, email: &str, token_type: &str, lifetime_secs: u64) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: email.to_string(),
            iss: self.issuer.clone(),
            token_type: token_type.to_string(),
            iat: now,
            exp: now + lifetime_secs as i64,
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::IssuanceFailed(e.to_string()))
    }

    /// Validate an access token and return the email it is bound to.
    /// Refresh tokens are not accepted here.
    pub fn verify_access(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.decode_claims(token)?;
        if claims.token_type != "access" {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims.sub)
    }

    /// Validate a refresh token and mint a fresh pair for its user.
    pub fn refresh(&self, token: &str, store: &dyn UserStore) -> Result<TokenPair, AuthError> {
        let claims = self.decode_claims(token)?;
        if claims.token_type != "refresh" {
            return Err(AuthError::TokenInvalid);
        }
        self.issue_for_email(&claims.sub, store)
    }

    fn decode_claims(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Session token rejected: {}", e);
            AuthError::TokenInvalid
        })
    }

    /// Authenticate a request by validating the Bearer access token.
    /// Returns the email the token is bound to.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let auth_header = headers
            .get("authorization")
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidFormat)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidFormat)?;

        self.verify_access(token)
    }
}
