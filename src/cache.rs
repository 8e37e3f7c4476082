use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::user::User;

/// Cache key for a user entry.
pub fn user_key(email: &str) -> String {
    format!("user:{}", email)
}

/// Short-lived user lookup cache.
///
/// Strictly an optimization: every caller must behave correctly when the
/// cache always misses. Writers to the user store are responsible for
/// refreshing or removing the matching entry in the same operation.
pub trait UserCache: Send + Sync {
    /// Get a non-expired entry, or `None`.
    fn get(&self, key: &str) -> Option<User>;
    /// Insert or overwrite an entry with a fresh TTL.
    fn set(&self, key: &str, user: User, ttl: Duration);
    fn remove(&self, key: &str);
}

/// In-process cache backed by a `HashMap` with per-entry deadlines.
pub struct InMemoryUserCache {
    entries: RwLock<HashMap<String, (User, Instant)>>,
}

impl InMemoryUserCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCache for InMemoryUserCache {
    fn get(&self, key: &str) -> Option<User> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((user, deadline)) if Instant::now() < *deadline => Some(user.clone()),
            _ => None,
        }
    }

    fn set(&self, key: &str, user: User, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (user, Instant::now() + ttl));
        // Expired entries are dropped lazily; sweep on write to bound growth.
        entries.retain(|_, (_, deadline)| Instant::now() < *deadline);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}
