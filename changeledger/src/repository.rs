//! Change-entry repository.
//!
//! Lifecycle per repository instance:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Ready
//!       ^                             |
//!       +------------failure----------+
//! ```
//!
//! `save_or_update`, `get_entries_log` and the read helpers only run in
//! `Ready`. Re-running `initialize` from `Ready` keeps the repository ready
//! while the schema is re-checked.

use std::{
    collections::HashSet,
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    entry::{ATTR_REVISION, ChangeEntry, item_revision},
    errors::{RepoError, SchemaError, StoreError},
    merge::merge,
    provisioner::{DEFAULT_READY_POLL_INTERVAL, SchemaProvisioner},
    runtime::with_deadline,
    store::{KeyValueStore, PutCondition},
};

const MIN_TABLE_NAME_LEN: usize = 3;
const MAX_TABLE_NAME_LEN: usize = 255;
/// Upper bound on the multiplier applied to `conflict_backoff`.
const MAX_BACKOFF_STEPS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

impl Lifecycle {
    fn as_u8(self) -> u8 {
        match self {
            Lifecycle::Uninitialized => 0,
            Lifecycle::Initializing => 1,
            Lifecycle::Ready => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Lifecycle::Initializing,
            2 => Lifecycle::Ready,
            _ => Lifecycle::Uninitialized,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initializing => "initializing",
            Lifecycle::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// Tunables for a repository instance.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Deadline applied by the operations that do not take one explicitly.
    pub operation_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub scan_page_size: usize,
    /// Base delay before retrying a save that lost a conditional-write race.
    pub conflict_backoff: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            scan_page_size: 100,
            conflict_backoff: Duration::from_millis(5),
        }
    }
}

/// Table names follow the usual managed key-value store rules: 3..=255 of `[A-Za-z0-9_.-]`.
pub fn is_valid_table_name(table: &str) -> bool {
    (MIN_TABLE_NAME_LEN..=MAX_TABLE_NAME_LEN).contains(&table.len())
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

pub struct ChangeEntryRepository<S> {
    store: S,
    table: String,
    provisioner: SchemaProvisioner<S>,
    options: RepositoryOptions,
    lifecycle: AtomicU8,
}

impl<S> fmt::Debug for ChangeEntryRepository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEntryRepository")
            .field("table", &self.table)
            .field("lifecycle", &Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire)))
            .finish()
    }
}

impl<S> ChangeEntryRepository<S>
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
            lifecycle: AtomicU8::new(Lifecycle::Uninitialized.as_u8()),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle.store(state.as_u8(), Ordering::Release);
    }

    fn ensure_ready(&self) -> Result<(), RepoError> {
        match self.lifecycle() {
            Lifecycle::Ready => Ok(()),
            state => {
                debug!("rejecting data operation on table '{}' in state {state}", self.table);
                Err(RepoError::not_initialized(&self.table))
            }
        }
    }

    /// A backend report of a missing table means someone dropped it under us.
    fn observe<T>(&self, result: Result<T, RepoError>) -> Result<T, RepoError> {
        if let Err(RepoError::NotInitialized { .. }) = &result {
            warn!("table '{}' is gone; repository is no longer ready", self.table);
            self.set_lifecycle(Lifecycle::Uninitialized);
        }
        result
    }

    /// Ensure the backing table exists (creating it if `allow_create`) and mark the repository ready.
    pub async fn initialize(&self, allow_create: bool) -> Result<(), RepoError> {
        self.initialize_within(allow_create, self.options.operation_timeout).await
    }

    pub async fn initialize_within(&self, allow_create: bool, timeout: Duration) -> Result<(), RepoError> {
        let was_ready = self
            .lifecycle
            .compare_exchange(
                Lifecycle::Uninitialized.as_u8(),
                Lifecycle::Initializing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err_and(|current| Lifecycle::from_u8(current) == Lifecycle::Ready);

        let result = self
            .provisioner
            .ensure_schema_within(&self.table, allow_create, timeout)
            .await;

        match &result {
            Ok(()) => {
                if !was_ready {
                    info!("change entry table '{}' is ready", self.table);
                }
                self.set_lifecycle(Lifecycle::Ready);
            }
            // the table is missing or malformed, whatever we believed before
            Err(RepoError::Schema(SchemaError::CreationNotAllowed { .. }) | RepoError::NotInitialized { .. }) => {
                self.set_lifecycle(Lifecycle::Uninitialized);
            }
            Err(err) => {
                warn!("initializing table '{}' failed: {err}", self.table);
                // a concurrent initializer may already have reached Ready
                if !was_ready {
                    let _ = self.lifecycle.compare_exchange(
                        Lifecycle::Initializing.as_u8(),
                        Lifecycle::Uninitialized.as_u8(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
            }
        }
        result
    }

    /// Insert `entry`, or merge it into the stored entry with the same `change_id`.
    pub async fn save_or_update(&self, entry: ChangeEntry) -> Result<(), RepoError> {
        self.save_or_update_within(entry, self.options.operation_timeout).await
    }

    pub async fn save_or_update_within(&self, entry: ChangeEntry, timeout: Duration) -> Result<(), RepoError> {
        self.ensure_ready()?;
        if entry.change_id.is_empty() {
            return Err(RepoError::invalid_entry("change entry has an empty changeId"));
        }
        let result = with_deadline("save_or_update", &self.table, timeout, self.upsert(entry)).await;
        self.observe(result)
    }

    async fn upsert(&self, entry: ChangeEntry) -> Result<(), RepoError> {
        let mut conflicts: u32 = 0;
        loop {
            let stored = self.store.get_item(&self.table, &entry.change_id).await?;
            let (existing, condition, revision) = match stored {
                Some(item) => {
                    let revision = item_revision(&item);
                    (
                        Some(ChangeEntry::from_item(item)?),
                        PutCondition::RevisionEquals { revision },
                        revision + 1,
                    )
                }
                None => (None, PutCondition::NotExists, 1),
            };

            let merged = merge(existing.as_ref(), entry.clone());
            let mut item = merged.to_item()?;
            item.insert(ATTR_REVISION.to_string(), Value::from(revision));

            match self.store.put_item(&self.table, item, Some(condition)).await {
                Ok(()) => {
                    debug!(
                        "saved change '{}' to table '{}' at revision {revision}",
                        merged.change_id, self.table
                    );
                    return Ok(());
                }
                Err(StoreError::ConditionFailed) => {
                    conflicts += 1;
                    debug!(
                        "concurrent write to change '{}' detected, retrying (attempt {conflicts})",
                        entry.change_id
                    );
                    let backoff = self.options.conflict_backoff * conflicts.min(MAX_BACKOFF_STEPS);
                    if backoff.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Every stored entry, in no particular order.
    pub async fn get_entries_log(&self) -> Result<Vec<ChangeEntry>, RepoError> {
        self.get_entries_log_within(self.options.operation_timeout).await
    }

    pub async fn get_entries_log_within(&self, timeout: Duration) -> Result<Vec<ChangeEntry>, RepoError> {
        self.ensure_ready()?;
        let result = with_deadline("get_entries_log", &self.table, timeout, self.scan_all()).await;
        self.observe(result)
    }

    async fn scan_all(&self) -> Result<Vec<ChangeEntry>, RepoError> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .store
                .scan(&self.table, cursor.take(), self.options.scan_page_size)
                .await?;
            pages += 1;
            for item in page.items {
                let entry = ChangeEntry::from_item(item)?;
                if seen.insert(entry.change_id.clone()) {
                    entries.push(entry);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!("scanned {} entries from table '{}' in {pages} page(s)", entries.len(), self.table);
        Ok(entries)
    }

    /// Stored entry for `change_id`, if any.
    pub async fn find_entry(&self, change_id: &str) -> Result<Option<ChangeEntry>, RepoError> {
        self.ensure_ready()?;
        let result = with_deadline("find_entry", &self.table, self.options.operation_timeout, async {
            self.store
                .get_item(&self.table, change_id)
                .await?
                .map(ChangeEntry::from_item)
                .transpose()
        })
        .await;
        self.observe(result)
    }

    /// Whether `change_id` by `author` already ran successfully.
    ///
    /// Entries without a state predate state tracking and count as executed;
    /// failed, ignored and rolled-back entries do not.
    pub async fn is_already_executed(&self, change_id: &str, author: &str) -> Result<bool, RepoError> {
        Ok(self
            .find_entry(change_id)
            .await?
            .is_some_and(|entry| entry.author == author && entry.is_executed()))
    }

    /// Entries that count as executed.
    pub async fn get_executed_entries(&self) -> Result<Vec<ChangeEntry>, RepoError> {
        let mut entries = self.get_entries_log().await?;
        entries.retain(ChangeEntry::is_executed);
        Ok(entries)
    }
}
