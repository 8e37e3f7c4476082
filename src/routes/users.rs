//! Profile and availability endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::cache::{user_key, UserCache};
use crate::error::AuthError;
use crate::models::user::{PublicProfile, User};
use crate::store::{AccountPatch, StoreError, UserStore};
use crate::AppState;

/// GET /users/me - the authenticated user's full profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<User>, AuthError> {
    let user = state.auth.current_user(&headers)?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize, Default)]
struct UserPatchRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
    email_notifications: Option<bool>,
}

fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.len() < 3 {
        return Err(AuthError::Validation(
            "Username must be at least 3 characters long".to_string(),
        ));
    }
    if !username.replace('_', "").chars().all(|c| c.is_alphanumeric()) {
        return Err(AuthError::Validation(
            "Username can only contain letters, numbers, and underscores".to_string(),
        ));
    }
    Ok(())
}

/// PATCH /users/me - partial profile update for the authenticated user.
async fn patch_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UserPatchRequest>,
) -> Result<Json<User>, AuthError> {
    let user = state.auth.current_user(&headers)?;

    if let Some(username) = &request.username {
        validate_username(username)?;
    }

    let patch = AccountPatch {
        first_name: request.first_name,
        last_name: request.last_name,
        username: request.username,
        email_notifications: request.email_notifications,
    };

    let updated = state
        .store
        .update_account(&user.email, &patch)
        .map_err(|e| match e {
            StoreError::UniqueViolation(_) => AuthError::Conflict,
            StoreError::Database(message) => AuthError::Database(message),
        })?;

    // Keep the reconciliation cache in step with the write.
    state.cache.set(
        &user_key(&updated.email),
        updated.clone(),
        Duration::from_secs(state.config.cache.user_ttl_secs),
    );

    Ok(Json(updated))
}

/// DELETE /users/me - delete the authenticated user's account.
async fn delete_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AuthError> {
    let user = state.auth.current_user(&headers)?;

    state
        .store
        .delete(&user.email)
        .map_err(|e| AuthError::Database(e.to_string()))?;
    state.cache.remove(&user_key(&user.email));

    tracing::info!("User account deleted: {}", user.email);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    available: bool,
    message: String,
}

fn availability(available: bool, message: &str) -> Json<AvailabilityResponse> {
    Json(AvailabilityResponse {
        available,
        message: message.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct EmailCheckParams {
    email: Option<String>,
}

/// GET /users/check-email - public email availability check.
async fn check_email(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EmailCheckParams>,
) -> (StatusCode, Json<AvailabilityResponse>) {
    let email = params
        .email
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();

    if email.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            availability(false, "Email parameter is required."),
        );
    }

    match state.store.email_taken(&email) {
        Ok(true) => (
            StatusCode::OK,
            availability(false, "Email is already registered."),
        ),
        Ok(false) => (StatusCode::OK, availability(true, "Email is available.")),
        Err(e) => {
            tracing::error!("Error checking email availability for '{}': {}", email, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                availability(false, "An error occurred while checking email availability."),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsernameCheckParams {
    username: Option<String>,
}

/// GET /users/check-username - availability check for the caller's
/// desired handle, excluding their own current one.
async fn check_username(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UsernameCheckParams>,
) -> Result<(StatusCode, Json<AvailabilityResponse>), AuthError> {
    let user = state.auth.current_user(&headers)?;

    let username = params
        .username
        .map(|u| u.trim().to_string())
        .unwrap_or_default();

    if username.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            availability(false, "Username parameter is required."),
        ));
    }
    if let Err(AuthError::Validation(message)) = validate_username(&username) {
        return Ok((StatusCode::BAD_REQUEST, availability(false, &message)));
    }

    match state.store.username_taken_by_other(&username, &user.email) {
        Ok(true) => Ok((
            StatusCode::OK,
            availability(false, "Username is already taken."),
        )),
        Ok(false) => Ok((StatusCode::OK, availability(true, "Username is available."))),
        Err(e) => {
            tracing::error!("Error checking username availability: {}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                availability(false, "An error occurred while checking username availability."),
            ))
        }
    }
}

/// GET /users/{username} - public profile of an active user.
async fn public_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<PublicProfile>, AuthError> {
    let user = state
        .store
        .find_by_username(&username)
        .map_err(|e| AuthError::Database(e.to_string()))?
        .filter(|u| u.is_active)
        .ok_or(AuthError::UserNotFound)?;

    Ok(Json(user.public_profile()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users/me", get(get_me).patch(patch_me).delete(delete_me))
        .route("/users/check-email", get(check_email))
        .route("/users/check-username", get(check_username))
        .route("/users/:username", get(public_profile))
        .with_state(state)
}
