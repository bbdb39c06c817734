//! In-memory store for tests and embedded use.
//!
//! Tables live in a `HashMap` behind `Arc<RwLock>`, so clones share state and
//! the store is safe on multi-threaded runtimes. Two knobs imitate a remote
//! backend: tables can stay in `CREATING` for a number of `describe_table`
//! calls, and failures or latency can be injected per call.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::Debug,
    ops::Bound,
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::{
    Item, KeySchema, KeyValueStore, PutCondition, ScanPage, TableDescription, TableStatus, partition_value,
};
use crate::{entry::item_revision, errors::StoreError};

struct MemoryTable {
    description: TableDescription,
    /// Remaining `describe_table` calls that still report `CREATING`.
    pending_polls: u32,
    items: BTreeMap<String, Item>,
}

#[derive(Default)]
struct Faults {
    queued: VecDeque<StoreError>,
    latency: Duration,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, MemoryTable>>>,
    activation_polls: Arc<Mutex<u32>>,
    faults: Arc<Mutex<Faults>>,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore").field("table_count", &tables.len()).finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newly created tables report `CREATING` for the first `polls` describe calls.
    pub fn with_activation_polls(self, polls: u32) -> Self {
        *self.activation_polls.lock() = polls;
        self
    }

    /// Every call sleeps for `latency` before touching state.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change the injected latency; applies to every clone.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    /// Fail the next call (of any kind) with `error`. Errors queue up in order.
    pub fn fail_next(&self, error: StoreError) {
        self.faults.lock().queued.push_back(error);
    }

    /// Create an already active table, bypassing the activation delay.
    pub fn create_active_table(&self, table: &str, key_schema: KeySchema) {
        self.tables.write().insert(
            table.to_string(),
            MemoryTable {
                description: TableDescription {
                    name: table.to_string(),
                    key_schema,
                    status: TableStatus::Active,
                    created_at: Utc::now(),
                },
                pending_polls: 0,
                items: BTreeMap::new(),
            },
        );
    }

    /// Remove a table and its items, as an administrator would.
    pub fn drop_table(&self, table: &str) -> bool {
        self.tables.write().remove(table).is_some()
    }

    /// Stored item count, or `None` if the table does not exist.
    pub fn item_count(&self, table: &str) -> Option<usize> {
        self.tables.read().get(table).map(|t| t.items.len())
    }

    /// Raw stored item, including store-internal attributes.
    pub fn raw_item(&self, table: &str, key: &str) -> Option<Item> {
        self.tables.read().get(table).and_then(|t| t.items.get(key).cloned())
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let (latency, injected) = {
            let mut faults = self.faults.lock();
            (faults.latency, faults.queued.pop_front())
        };
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn condition_holds(existing: Option<&Item>, condition: Option<PutCondition>) -> bool {
    match (condition, existing) {
        (None, _) => true,
        (Some(PutCondition::NotExists), existing) => existing.is_none(),
        (Some(PutCondition::RevisionEquals { .. }), None) => false,
        (Some(PutCondition::RevisionEquals { revision }), Some(item)) => item_revision(item) == revision,
    }
}

impl KeyValueStore for MemoryStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.enter().await?;
        Ok(self.tables.read().contains_key(table))
    }

    async fn create_table(&self, table: &str, key_schema: &KeySchema) -> Result<(), StoreError> {
        self.enter().await?;
        let pending_polls = *self.activation_polls.lock();
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Err(StoreError::TableAlreadyExists(table.to_string()));
        }
        let status = if pending_polls == 0 {
            TableStatus::Active
        } else {
            TableStatus::Creating
        };
        tables.insert(
            table.to_string(),
            MemoryTable {
                description: TableDescription {
                    name: table.to_string(),
                    key_schema: key_schema.clone(),
                    status,
                    created_at: Utc::now(),
                },
                pending_polls,
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.write();
        let Some(entry) = tables.get_mut(table) else {
            return Ok(None);
        };
        if entry.pending_polls > 0 {
            entry.pending_polls -= 1;
        } else {
            entry.description.status = TableStatus::Active;
        }
        Ok(Some(entry.description.clone()))
    }

    async fn put_item(&self, table: &str, item: Item, condition: Option<PutCondition>) -> Result<(), StoreError> {
        self.enter().await?;
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let key = partition_value(&item, &entry.description.key_schema)?.to_string();
        if !condition_holds(entry.items.get(&key), condition) {
            return Err(StoreError::ConditionFailed);
        }
        entry.items.insert(key, item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        self.enter().await?;
        let tables = self.tables.read();
        let entry = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(entry.items.get(key).cloned())
    }

    async fn scan(&self, table: &str, cursor: Option<String>, limit: usize) -> Result<ScanPage, StoreError> {
        self.enter().await?;
        let tables = self.tables.read();
        let entry = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let lower = match cursor {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let page: Vec<(&String, &Item)> = entry
            .items
            .range((lower, Bound::Unbounded))
            .take(limit.max(1))
            .collect();
        let last_key = page.last().map(|(key, _)| (*key).clone());
        let has_more = last_key
            .as_ref()
            .is_some_and(|last| entry.items.range::<String, _>((Bound::Excluded(last), Bound::Unbounded)).next().is_some());
        Ok(ScanPage {
            items: page.into_iter().map(|(_, item)| item.clone()).collect(),
            next_cursor: if has_more { last_key } else { None },
        })
    }
}
