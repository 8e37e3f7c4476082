use std::sync::Arc;
use std::time::Duration;

use crate::auth::verifier::IdentityClaims;
use crate::cache::{user_key, UserCache};
use crate::error::AuthError;
use crate::models::user::User;
use crate::store::{NewUser, ProfileFields, StoreError, UserStore};

/// Maps a verified identity claim set onto a local user record.
///
/// Lookup order is cache, then store. A cache hit is still checked for
/// profile drift against the incoming claims, so a stale entry can never
/// suppress an update. Creation relies on the store's email uniqueness
/// constraint to stay single-winner under concurrent sign-ins.
pub struct Reconciler {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn UserCache>,
    cache_ttl: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn UserStore>, cache: Arc<dyn UserCache>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Resolve the claims to a user, creating or updating as needed.
    /// Returns the user and whether it was newly created.
    pub fn reconcile(&self, claims: &IdentityClaims) -> Result<(User, bool), AuthError> {
        let email = claims.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidIdentityData(
                "email is required".to_string(),
            ));
        }

        let key = user_key(&email);

        let existing = match self.cache.get(&key) {
            Some(user) => Some(user),
            None => {
                let user = self.store.find_by_email(&email).map_err(store_error)?;
                if let Some(user) = &user {
                    self.cache.set(&key, user.clone(), self.cache_ttl);
                }
                user
            }
        };

        match existing {
            Some(user) => {
                let user = self.sync_profile(user, claims, &key)?;
                Ok((user, false))
            }
            None => {
                let user = self.create(claims, &email, &key)?;
                Ok((user, true))
            }
        }
    }

    /// Persist incoming profile fields when they differ from the stored
    /// (or cached) copy. No write happens when nothing changed.
    fn sync_profile(
        &self,
        user: User,
        claims: &IdentityClaims,
        key: &str,
    ) -> Result<User, AuthError> {
        let incoming = ProfileFields {
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            profile_picture_url: claims.picture.clone(),
        };
        let current = ProfileFields {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_picture_url: user.profile_picture_url.clone(),
        };

        if incoming == current {
            return Ok(user);
        }

        let updated = self
            .store
            .update_profile(&user.email, &incoming)
            .map_err(store_error)?;
        self.cache.set(key, updated.clone(), self.cache_ttl);
        tracing::debug!("Synced profile fields for {}", updated.email);
        Ok(updated)
    }

    fn create(&self, claims: &IdentityClaims, email: &str, key: &str) -> Result<User, AuthError> {
        let result = self.store.create(NewUser {
            email: email.to_string(),
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            profile_picture_url: claims.picture.clone(),
            is_active: claims.email_verified,
        });

        match result {
            Ok(user) => {
                self.cache.set(key, user.clone(), self.cache_ttl);
                Ok(user)
            }
            // Somebody else created the same email between our lookup and
            // our insert. The caller retries and hits the found path.
            Err(StoreError::UniqueViolation(column)) => {
                tracing::warn!(
                    "Concurrent creation detected for {} (column {})",
                    email,
                    column
                );
                Err(AuthError::Conflict)
            }
            Err(e) => Err(store_error(e)),
        }
    }
}

fn store_error(err: StoreError) -> AuthError {
    match err {
        StoreError::UniqueViolation(_) => AuthError::Conflict,
        StoreError::Database(message) => AuthError::Database(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryUserCache;
    use crate::store::sqlite::SqliteUserStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn claims(email: &str, given_name: &str, verified: bool) -> IdentityClaims {
        IdentityClaims {
            email: email.to_string(),
            given_name: given_name.to_string(),
            family_name: "Silva".to_string(),
            picture: "https://pics.example/p.jpg".to_string(),
            subject_id: "google-sub-1".to_string(),
            email_verified: verified,
            locale: "en".to_string(),
        }
    }

    /// Store wrapper that counts writes, for the idempotency property.
    struct CountingStore {
        inner: SqliteUserStore,
        writes: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: SqliteUserStore::new(":memory:").unwrap(),
                writes: AtomicUsize::new(0),
            }
        }
    }

    impl UserStore for CountingStore {
        fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_email(email)
        }
        fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_username(username)
        }
        fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.create(new_user)
        }
        fn update_profile(&self, email: &str, fields: &ProfileFields) -> Result<User, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update_profile(email, fields)
        }
        fn update_account(
            &self,
            email: &str,
            patch: &crate::store::AccountPatch,
        ) -> Result<User, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update_account(email, patch)
        }
        fn delete(&self, email: &str) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(email)
        }
        fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
            self.inner.email_taken(email)
        }
        fn username_taken_by_other(
            &self,
            username: &str,
            own_email: &str,
        ) -> Result<bool, StoreError> {
            self.inner.username_taken_by_other(username, own_email)
        }
    }

    /// Store double whose `create` always loses the uniqueness race.
    struct LosingRaceStore;

    impl UserStore for LosingRaceStore {
        fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        fn create(&self, _new_user: NewUser) -> Result<User, StoreError> {
            Err(StoreError::UniqueViolation("email".to_string()))
        }
        fn update_profile(
            &self,
            _email: &str,
            _fields: &ProfileFields,
        ) -> Result<User, StoreError> {
            unreachable!("no update expected")
        }
        fn update_account(
            &self,
            _email: &str,
            _patch: &crate::store::AccountPatch,
        ) -> Result<User, StoreError> {
            unreachable!("no update expected")
        }
        fn delete(&self, _email: &str) -> Result<(), StoreError> {
            unreachable!("no delete expected")
        }
        fn email_taken(&self, _email: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn username_taken_by_other(
            &self,
            _username: &str,
            _own_email: &str,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn reconciler_with(store: Arc<dyn UserStore>) -> Reconciler {
        Reconciler::new(
            store,
            Arc::new(InMemoryUserCache::new()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_creation_for_unseen_email() {
        let reconciler = reconciler_with(Arc::new(SqliteUserStore::new(":memory:").unwrap()));

        let (user, created) = reconciler.reconcile(&claims("new@x.com", "Ana", true)).unwrap();
        assert!(created);
        assert_eq!(user.email, "new@x.com");
        assert_eq!(user.first_name, "Ana");
        assert!(user.is_active);
    }

    #[test]
    fn test_unverified_email_creates_inactive_user() {
        let reconciler = reconciler_with(Arc::new(SqliteUserStore::new(":memory:").unwrap()));

        let (user, created) = reconciler
            .reconcile(&claims("new@x.com", "Ana", false))
            .unwrap();
        assert!(created);
        assert!(!user.is_active);
    }

    #[test]
    fn test_second_reconcile_is_idempotent() {
        let store = Arc::new(CountingStore::new());
        let reconciler = reconciler_with(store.clone());

        let identity = claims("ana@x.com", "Ana", true);
        let (_, created) = reconciler.reconcile(&identity).unwrap();
        assert!(created);
        let writes_after_create = store.writes.load(Ordering::SeqCst);

        let (_, created) = reconciler.reconcile(&identity).unwrap();
        assert!(!created);
        assert_eq!(store.writes.load(Ordering::SeqCst), writes_after_create);
    }

    #[test]
    fn test_changed_given_name_is_synced() {
        let store = Arc::new(SqliteUserStore::new(":memory:").unwrap());
        let reconciler = reconciler_with(store.clone());

        reconciler.reconcile(&claims("ana@x.com", "Old", true)).unwrap();
        let (user, created) = reconciler.reconcile(&claims("ana@x.com", "New", true)).unwrap();

        assert!(!created);
        assert_eq!(user.first_name, "New");
        // Unchanged fields untouched.
        assert_eq!(user.last_name, "Silva");

        let stored = store.find_by_email("ana@x.com").unwrap().unwrap();
        assert_eq!(stored.first_name, "New");
    }

    #[test]
    fn test_stale_cache_hit_still_syncs_profile() {
        let store = Arc::new(SqliteUserStore::new(":memory:").unwrap());
        let cache = Arc::new(InMemoryUserCache::new());
        let reconciler = Reconciler::new(store.clone(), cache.clone(), Duration::from_secs(60));

        let (user, _) = reconciler.reconcile(&claims("a@x.com", "Old", true)).unwrap();

        // Make the cached copy stale relative to the incoming claim.
        cache.set(&user_key("a@x.com"), user, Duration::from_secs(60));

        let (updated, created) = reconciler.reconcile(&claims("a@x.com", "New", true)).unwrap();
        assert!(!created);
        assert_eq!(updated.first_name, "New");

        // Both store and cache now carry the fresh value.
        assert_eq!(
            store.find_by_email("a@x.com").unwrap().unwrap().first_name,
            "New"
        );
        assert_eq!(
            cache.get(&user_key("a@x.com")).unwrap().first_name,
            "New"
        );
    }

    #[test]
    fn test_missing_email_fails_without_store_access() {
        let store = Arc::new(CountingStore::new());
        let reconciler = reconciler_with(store.clone());

        let err = reconciler.reconcile(&claims("", "Ana", true)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdentityData(_)));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_email_without_at_sign_is_invalid() {
        let reconciler = reconciler_with(Arc::new(SqliteUserStore::new(":memory:").unwrap()));
        let err = reconciler
            .reconcile(&claims("not-an-email", "Ana", true))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdentityData(_)));
    }

    #[test]
    fn test_lost_create_race_maps_to_conflict() {
        let reconciler = reconciler_with(Arc::new(LosingRaceStore));
        let err = reconciler
            .reconcile(&claims("raced@x.com", "Ana", true))
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[test]
    fn test_reconcile_works_with_cold_cache_every_time() {
        // Correctness must not depend on the cache: drop it between calls.
        let store = Arc::new(SqliteUserStore::new(":memory:").unwrap());

        let first = reconciler_with(store.clone());
        let (_, created) = first.reconcile(&claims("a@x.com", "Ana", true)).unwrap();
        assert!(created);

        let second = reconciler_with(store.clone());
        let (_, created) = second.reconcile(&claims("a@x.com", "Ana", true)).unwrap();
        assert!(!created);
    }
}
