//! User persistence boundary.
//!
//! The reconciler and the user routes talk to this trait; the SQLite
//! implementation lives in [`sqlite`]. Uniqueness violations are reported
//! as a distinct error kind so that a lost create race can be told apart
//! from a generic database failure.

pub mod sqlite;

pub use sqlite::SqliteUserStore;

use crate::models::user::User;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A UNIQUE constraint fired, e.g. concurrent creation for the same
    /// email. The column name identifies which key collided.
    #[error("Uniqueness conflict on {0}")]
    UniqueViolation(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Field set for creating a user from a verified identity claim.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture_url: String,
    pub is_active: bool,
}

/// The three profile fields kept in sync with the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFields {
    pub first_name: String,
    pub last_name: String,
    pub profile_picture_url: String,
}

/// Partial update applied by `PATCH /users/me`.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email_notifications: Option<bool>,
}

pub trait UserStore: Send + Sync {
    /// Exact-match lookup by normalized (lowercased) email.
    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Create a user. A username is generated internally; the email UNIQUE
    /// constraint is the correctness mechanism for concurrent creation.
    fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Overwrite the provider-synced profile fields and return the updated
    /// record.
    fn update_profile(&self, email: &str, fields: &ProfileFields) -> Result<User, StoreError>;

    /// Apply a partial account update and return the updated record.
    fn update_account(&self, email: &str, patch: &AccountPatch) -> Result<User, StoreError>;

    fn delete(&self, email: &str) -> Result<(), StoreError>;

    fn email_taken(&self, email: &str) -> Result<bool, StoreError>;

    /// Whether `username` is taken by a user other than `own_email`.
    fn username_taken_by_other(&self, username: &str, own_email: &str) -> Result<bool, StoreError>;
}
