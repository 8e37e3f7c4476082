use chrono::{DateTime, Utc};
use serde::Serialize;

/// User record created on first successful Google sign-in.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    /// Internal ID (UUID string).
    pub id: String,
    /// Email from the ID token, lowercased. Unique identity key.
    pub email: String,
    /// Unique public handle, auto-generated at creation.
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// OAuth profile picture URL.
    pub profile_picture_url: String,
    /// Set from `email_verified` at creation; never auto-reactivated.
    pub is_active: bool,
    pub email_notifications: bool,
    pub date_joined: DateTime<Utc>,
}

/// Public profile shape returned for `GET /users/{username}`.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture_url: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_picture_url: self.profile_picture_url.clone(),
        }
    }
}
