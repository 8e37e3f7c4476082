pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod store;
pub mod test_util;

pub use auth::{AuthService, GoogleTokenVerifier, IdentityClaims, Reconciler, SessionIssuer, TokenPair};
pub use cache::{InMemoryUserCache, UserCache};
pub use config::Config;
pub use error::AuthError;
pub use models::user::{PublicProfile, User};
pub use store::{SqliteUserStore, UserStore};

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub auth: AuthService,
    pub store: Arc<dyn UserStore>,
    pub cache: Arc<dyn UserCache>,
}
