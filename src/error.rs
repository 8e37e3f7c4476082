use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the authentication flow and the user API.
///
/// `TokenInvalid` deliberately carries no detail: the underlying cause
/// (expired signature, issuer mismatch, malformed token, ...) is logged
/// but never returned to the client.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token is invalid or expired")]
    TokenInvalid,

    #[error("Invalid identity data: {0}")]
    InvalidIdentityData(String),

    #[error("A user with this email already exists")]
    Conflict,

    #[error("User not found")]
    UserNotFound,

    #[error("Identity is required")]
    IdentityRequired,

    #[error("Token issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Invalid Authorization header format")]
    InvalidFormat,

    #[error("Missing required token parameter")]
    MissingToken,

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::TokenInvalid => (StatusCode::UNAUTHORIZED, "token_invalid"),
            AuthError::InvalidIdentityData(_) => (StatusCode::BAD_REQUEST, "invalid_identity_data"),
            AuthError::Conflict => (StatusCode::CONFLICT, "conflict"),
            AuthError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
            AuthError::IdentityRequired => (StatusCode::BAD_REQUEST, "identity_required"),
            AuthError::IssuanceFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "issuance_failed"),
            AuthError::MissingHeader => (StatusCode::UNAUTHORIZED, "missing_header"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "invalid_header"),
            AuthError::MissingToken => (StatusCode::BAD_REQUEST, "missing_token"),
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AuthError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}
