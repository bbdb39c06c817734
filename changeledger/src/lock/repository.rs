use std::{future::Future, time::Duration};

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;

use super::{LockEntry, LockStatus, lock_key_schema};
use crate::{
    entry::{ATTR_REVISION, item_revision},
    errors::{LockError, RepoError, StoreError},
    provisioner::SchemaProvisioner,
    repository::{RepositoryOptions, is_valid_table_name},
    store::{KeyValueStore, PutCondition},
};

/// Conditional reads and writes of lock items.
#[derive(Debug, Clone)]
pub struct LockRepository<S> {
    store: S,
    table: String,
    provisioner: SchemaProvisioner<S>,
    options: RepositoryOptions,
}

impl<S> LockRepository<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S, table: impl Into<String>) -> Result<Self, RepoError> {
        Self::with_options(store, table, RepositoryOptions::default())
    }

    pub fn with_options(store: S, table: impl Into<String>, options: RepositoryOptions) -> Result<Self, RepoError> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(RepoError::InvalidTableName { table });
        }
        let provisioner = SchemaProvisioner::new(store.clone()).with_poll_interval(options.ready_poll_interval);
        Ok(Self {
            store,
            table,
            provisioner,
            options,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ensure the lock table exists, creating it if `allow_create`.
    pub async fn initialize(&self, allow_create: bool) -> Result<(), RepoError> {
        self.provisioner
            .ensure_table_within(&self.table, &lock_key_schema(), allow_create, self.options.operation_timeout)
            .await?;
        info!("lock table '{}' is ready", self.table);
        Ok(())
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<LockEntry>, LockError> {
        self.within("find_lock", async { Ok(self.read(key).await?.map(|(entry, _)| entry)) })
            .await
    }

    /// Write `entry` unless another owner holds an unexpired lease.
    ///
    /// A free, released or expired lock is taken over; a lease already owned
    /// by `entry.owner` is extended.
    pub async fn insert_update(&self, entry: &LockEntry) -> Result<(), LockError> {
        self.within("insert_lock", async {
            loop {
                let (condition, revision) = match self.read(&entry.key).await? {
                    Some((current, _)) if current.blocks(&entry.owner, Utc::now()) => {
                        return Err(LockError::HeldByOther {
                            key: entry.key.clone(),
                            owner: current.owner,
                            until: current.expires_at,
                        });
                    }
                    Some((_, revision)) => (PutCondition::RevisionEquals { revision }, revision + 1),
                    None => (PutCondition::NotExists, 1),
                };
                if self.write(entry, condition, revision).await? {
                    return Ok(());
                }
                self.backoff(&entry.key).await;
            }
        })
        .await
    }

    /// Extend a lease that `entry.owner` still holds.
    pub async fn update_if_same_owner(&self, entry: &LockEntry) -> Result<(), LockError> {
        self.within("refresh_lock", async {
            loop {
                let Some((current, revision)) = self.read(&entry.key).await? else {
                    return Err(LockError::Lost { key: entry.key.clone() });
                };
                if current.blocks(&entry.owner, Utc::now()) {
                    return Err(LockError::HeldByOther {
                        key: entry.key.clone(),
                        owner: current.owner,
                        until: current.expires_at,
                    });
                }
                if current.owner != entry.owner || current.status != LockStatus::LockHeld {
                    return Err(LockError::Lost { key: entry.key.clone() });
                }
                if self
                    .write(entry, PutCondition::RevisionEquals { revision }, revision + 1)
                    .await?
                {
                    return Ok(());
                }
                self.backoff(&entry.key).await;
            }
        })
        .await
    }

    /// Mark the lock released if `owner` holds it. Returns whether anything changed.
    pub async fn remove_by_key_and_owner(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        self.within("release_lock", async {
            loop {
                let (current, revision) = match self.read(key).await? {
                    Some((current, revision))
                        if current.owner == owner && current.status == LockStatus::LockHeld =>
                    {
                        (current, revision)
                    }
                    _ => return Ok(false),
                };
                let released = LockEntry {
                    status: LockStatus::Released,
                    expires_at: Utc::now(),
                    ..current
                };
                if self
                    .write(&released, PutCondition::RevisionEquals { revision }, revision + 1)
                    .await?
                {
                    return Ok(true);
                }
                self.backoff(key).await;
            }
        })
        .await
    }

    async fn read(&self, key: &str) -> Result<Option<(LockEntry, u64)>, LockError> {
        match self.store.get_item(&self.table, key).await? {
            Some(item) => {
                let revision = item_revision(&item);
                Ok(Some((LockEntry::from_item(item)?, revision)))
            }
            None => Ok(None),
        }
    }

    /// `Ok(false)` when the condition no longer held.
    async fn write(&self, entry: &LockEntry, condition: PutCondition, revision: u64) -> Result<bool, LockError> {
        let mut item = entry.to_item()?;
        item.insert(ATTR_REVISION.to_string(), Value::from(revision));
        match self.store.put_item(&self.table, item, Some(condition)).await {
            Ok(()) => {
                debug!(
                    "wrote lock '{}' for '{}' ({:?}) at revision {revision}",
                    entry.key, entry.owner, entry.status
                );
                Ok(true)
            }
            Err(StoreError::ConditionFailed) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn backoff(&self, key: &str) {
        debug!("lock '{key}' changed while writing, re-reading");
        if self.options.conflict_backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.conflict_backoff).await;
        }
    }

    async fn within<T, F>(&self, operation: &'static str, fut: F) -> Result<T, LockError>
    where
        F: Future<Output = Result<T, LockError>>,
    {
        let after: Duration = self.options.operation_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{operation} on table '{}' exceeded its deadline of {after:?}", self.table);
                Err(RepoError::Timeout {
                    operation,
                    table: self.table.clone(),
                    after,
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as TimeDelta;

    async fn ready(store: &MemoryStore) -> LockRepository<MemoryStore> {
        let repository = LockRepository::new(store.clone(), "locks").unwrap();
        repository.initialize(true).await.unwrap();
        repository
    }

    fn lease(owner: &str, secs: i64) -> LockEntry {
        LockEntry::held("k", owner, Utc::now() + TimeDelta::seconds(secs))
    }

    fn stored_revision(store: &MemoryStore) -> u64 {
        item_revision(&store.raw_item("locks", "k").unwrap())
    }

    #[tokio::test]
    async fn missing_table_without_creation_is_rejected() {
        let repository = LockRepository::new(MemoryStore::new(), "locks").unwrap();
        assert!(matches!(repository.initialize(false).await, Err(RepoError::Schema(_))));
    }

    #[tokio::test]
    async fn first_insert_creates_the_item() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;
        let entry = lease("a", 10);
        repository.insert_update(&entry).await.unwrap();

        assert_eq!(repository.find_by_key("k").await.unwrap(), Some(entry));
        assert_eq!(stored_revision(&store), 1);
    }

    #[tokio::test]
    async fn foreign_unexpired_lease_is_not_overwritten() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;
        repository.insert_update(&lease("a", 10)).await.unwrap();

        let err = repository.insert_update(&lease("b", 10)).await.unwrap_err();
        assert!(matches!(err, LockError::HeldByOther { ref owner, .. } if owner == "a"));
        assert_eq!(repository.find_by_key("k").await.unwrap().unwrap().owner, "a");
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;
        repository.insert_update(&lease("a", -1)).await.unwrap();
        repository.insert_update(&lease("b", 10)).await.unwrap();

        assert_eq!(repository.find_by_key("k").await.unwrap().unwrap().owner, "b");
        assert_eq!(stored_revision(&store), 2);
    }

    #[tokio::test]
    async fn refresh_requires_the_same_owner() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;

        assert!(matches!(
            repository.update_if_same_owner(&lease("a", 10)).await,
            Err(LockError::Lost { .. })
        ));

        repository.insert_update(&lease("a", 10)).await.unwrap();
        let extended = lease("a", 60);
        repository.update_if_same_owner(&extended).await.unwrap();
        assert_eq!(repository.find_by_key("k").await.unwrap().unwrap().expires_at, extended.expires_at);

        assert!(matches!(
            repository.update_if_same_owner(&lease("b", 10)).await,
            Err(LockError::HeldByOther { .. })
        ));
    }

    #[tokio::test]
    async fn release_only_applies_to_the_owner() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;
        repository.insert_update(&lease("a", 10)).await.unwrap();

        assert!(!repository.remove_by_key_and_owner("k", "b").await.unwrap());
        assert!(repository.remove_by_key_and_owner("k", "a").await.unwrap());
        assert!(!repository.remove_by_key_and_owner("k", "a").await.unwrap());

        let stored = repository.find_by_key("k").await.unwrap().unwrap();
        assert_eq!(stored.status, LockStatus::Released);
        assert!(!stored.is_active_at(Utc::now()));

        // released locks are free for anyone
        repository.insert_update(&lease("b", 10)).await.unwrap();
        assert!(matches!(
            repository.update_if_same_owner(&lease("a", 10)).await,
            Err(LockError::HeldByOther { .. })
        ));
    }

    #[tokio::test]
    async fn racing_owners_cannot_both_take_a_free_lock() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;

        let lease_a = lease("a", 10);
        let lease_b = lease("b", 10);
        let (a, b) = tokio::join!(
            repository.insert_update(&lease_a),
            repository.insert_update(&lease_b)
        );
        assert!(a.is_ok() != b.is_ok(), "exactly one owner wins: {a:?} {b:?}");
        let winner = repository.find_by_key("k").await.unwrap().unwrap().owner;
        assert_eq!(winner, if a.is_ok() { "a" } else { "b" });
    }

    #[tokio::test]
    async fn unavailable_backend_surfaces_as_repo_error() {
        let store = MemoryStore::new();
        let repository = ready(&store).await;
        store.fail_next(StoreError::unavailable("reset"));

        let err = repository.insert_update(&lease("a", 10)).await.unwrap_err();
        assert!(matches!(err, LockError::Repo(RepoError::BackendUnavailable { .. })));
        assert!(err.is_retryable());
    }
}
