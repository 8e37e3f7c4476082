//! The sign-in core: token verification, identity reconciliation, and
//! session issuance, composed linearly with no partial-success state.

pub mod issuer;
pub mod reconciler;
pub mod verifier;

pub use issuer::{SessionIssuer, TokenPair};
pub use reconciler::Reconciler;
pub use verifier::{GoogleTokenVerifier, IdentityClaims};

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::AuthError;
use crate::models::user::User;
use crate::store::UserStore;

/// Composed authentication flow: verifier, then reconciler, then issuer.
pub struct AuthService {
    verifier: GoogleTokenVerifier,
    reconciler: Reconciler,
    issuer: SessionIssuer,
    store: Arc<dyn UserStore>,
}

impl AuthService {
    pub fn new(
        verifier: GoogleTokenVerifier,
        reconciler: Reconciler,
        issuer: SessionIssuer,
        store: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            verifier,
            reconciler,
            issuer,
            store,
        }
    }

    /// Full sign-in flow for a Google ID token.
    ///
    /// Each step either succeeds or its error propagates unchanged; there
    /// is no recovery between steps.
    pub async fn authenticate_with_identity_token(
        &self,
        token: &str,
    ) -> Result<(TokenPair, User, bool), AuthError> {
        let claims = self.verifier.verify(token).await?;
        let (user, created) = self.reconciler.reconcile(&claims)?;
        let pair = self.issuer.issue_for_user(&user)?;
        Ok((pair, user, created))
    }

    /// Resolve the authenticated user behind a request's Bearer token.
    pub fn current_user(&self, headers: &HeaderMap) -> Result<User, AuthError> {
        let email = self.issuer.authenticate(headers)?;
        self.store
            .find_by_email(&email)
            .map_err(|e| AuthError::Database(e.to_string()))?
            .ok_or(AuthError::UserNotFound)
    }

    /// Rotate a refresh token into a fresh pair.
    pub fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.issuer.refresh(refresh_token, self.store.as_ref())
    }
}
