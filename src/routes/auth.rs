//! Sign-in endpoints.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::TokenPair;
use crate::error::AuthError;
use crate::models::user::User;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct GoogleAuthRequest {
    id_token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    access: String,
    refresh: String,
    user: User,
    created: bool,
}

/// POST /auth/google - exchange a Google ID token for a session pair.
async fn google_auth(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GoogleAuthRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let token = request
        .id_token
        .or(request.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            tracing::warn!("Google auth attempt without token");
            AuthError::MissingToken
        })?;

    let (pair, user, created) = state.auth.authenticate_with_identity_token(&token).await?;

    tracing::info!(
        "Google authentication successful for user: {} (created={})",
        user.email,
        created
    );

    let TokenPair { access, refresh } = pair;
    Ok(Json(AuthResponse {
        access,
        refresh,
        user,
        created,
    }))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh: String,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    access: String,
    refresh: String,
}

/// POST /auth/refresh - rotate a refresh token into a fresh pair.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let pair = state.auth.refresh_session(&request.refresh)?;
    Ok(Json(RefreshResponse {
        access: pair.access,
        refresh: pair.refresh,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/google", post(google_auth))
        .route("/auth/refresh", post(refresh))
        .with_state(state)
}
