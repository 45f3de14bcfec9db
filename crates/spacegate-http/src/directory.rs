//! Mapping verified external identities to local users.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use spacegate_core::{ExternalIdentity, LocalUser};
use tracing::info;

/// Errors from the local user directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The backing store is unavailable.
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// The store of local users, keyed by external identity id.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Return the user bound to `identity`, creating it if absent.
    ///
    /// An existing user's stored profile fields are never changed.
    async fn resolve_or_create(&self, identity: &ExternalIdentity)
    -> Result<LocalUser, DirectoryError>;

    /// Overwrite the stored profile of the user bound to `identity` with the
    /// identity's current fields, creating the user if absent.
    async fn sync_profile(&self, identity: &ExternalIdentity) -> Result<LocalUser, DirectoryError>;
}

/// Concurrency-safe in-memory [`UserDirectory`].
#[derive(Debug)]
pub struct InMemoryUserDirectory {
    users: DashMap<i64, LocalUser>,
    next_id: AtomicU64,
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Look up a user by external id.
    #[must_use]
    pub fn get(&self, external_id: i64) -> Option<LocalUser> {
        self.users.get(&external_id).map(|u| u.value().clone())
    }

    fn new_user(&self, identity: &ExternalIdentity) -> LocalUser {
        let mut user = LocalUser {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            external_id: identity.id(),
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            language_code: String::new(),
        };
        apply_profile(&mut user, identity);
        user
    }
}

/// Copy the identity's profile fields onto `user`. Absent fields become empty.
fn apply_profile(user: &mut LocalUser, identity: &ExternalIdentity) {
    user.username = identity.username().unwrap_or_default().to_owned();
    user.first_name = identity.first_name().unwrap_or_default().to_owned();
    user.last_name = identity.last_name().unwrap_or_default().to_owned();
    user.language_code = identity.language_code().unwrap_or_default().to_owned();
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve_or_create(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<LocalUser, DirectoryError> {
        let user = match self.users.entry(identity.id()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let user = self.new_user(identity);
                info!(user_id = user.id, external_id = user.external_id, "Created local user");
                entry.insert(user).clone()
            }
        };
        Ok(user)
    }

    async fn sync_profile(&self, identity: &ExternalIdentity) -> Result<LocalUser, DirectoryError> {
        let user = match self.users.entry(identity.id()) {
            Entry::Occupied(mut entry) => {
                apply_profile(entry.get_mut(), identity);
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry.insert(self.new_user(identity)).clone(),
        };
        info!(user_id = user.id, external_id = user.external_id, "Synced local user profile");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn identity(id: i64, username: &str) -> ExternalIdentity {
        ExternalIdentity::new(id)
            .unwrap()
            .with_username(Some(username.to_owned()))
            .with_first_name(Some("Ada".to_owned()))
    }

    #[tokio::test]
    async fn test_should_create_user_once() {
        let directory = InMemoryUserDirectory::new();
        let first = directory.resolve_or_create(&identity(42, "ada")).await.unwrap();
        let second = directory.resolve_or_create(&identity(42, "ada")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.username, "ada");
        assert_eq!(first.last_name, "");
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_should_not_overwrite_on_resolve() {
        let directory = InMemoryUserDirectory::new();
        directory.resolve_or_create(&identity(42, "ada")).await.unwrap();
        let user = directory.resolve_or_create(&identity(42, "countess")).await.unwrap();
        assert_eq!(user.username, "ada");
    }

    #[tokio::test]
    async fn test_should_overwrite_on_sync() {
        let directory = InMemoryUserDirectory::new();
        let created = directory.resolve_or_create(&identity(42, "ada")).await.unwrap();
        let synced = directory.sync_profile(&identity(42, "countess")).await.unwrap();
        assert_eq!(synced.id, created.id);
        assert_eq!(synced.username, "countess");
        assert_eq!(directory.get(42).unwrap().username, "countess");
    }

    #[tokio::test]
    async fn test_should_assign_distinct_ids() {
        let directory = InMemoryUserDirectory::new();
        let a = directory.resolve_or_create(&identity(1, "a")).await.unwrap();
        let b = directory.resolve_or_create(&identity(2, "b")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_should_create_single_user_under_contention() {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let directory = Arc::clone(&directory);
            handles.push(tokio::spawn(async move {
                directory.resolve_or_create(&identity(7, "x")).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(directory.len(), 1);
    }
}
