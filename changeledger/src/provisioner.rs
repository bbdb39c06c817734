//! Backing-table provisioning.
//!
//! The provisioner is the only component that issues `create_table`. It is
//! idempotent: an existing table with the expected key layout is accepted
//! as-is, and losing a creation race to another initializer is treated the
//! same as creating the table ourselves.

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    entry::ATTR_CHANGE_ID,
    errors::{RepoError, SchemaError, StoreError},
    runtime::with_deadline,
    store::{AttributeType, KeySchema, KeyValueStore, TableDescription, TableStatus},
};

/// Default delay between `describe_table` polls while a table activates.
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Key layout every change entry table must have.
pub fn change_entry_key_schema() -> KeySchema {
    KeySchema::partition(ATTR_CHANGE_ID, AttributeType::String)
}

#[derive(Debug, Clone)]
pub struct SchemaProvisioner<S> {
    store: S,
    poll_interval: Duration,
}

impl<S> SchemaProvisioner<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_READY_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Make sure `table` exists, is shaped for change entries and is active.
    ///
    /// Waits for activation without bound; use [`ensure_schema_within`](Self::ensure_schema_within)
    /// or wrap the call in a deadline.
    pub async fn ensure_schema(&self, table: &str, allow_create: bool) -> Result<(), RepoError> {
        self.ensure_table(table, &change_entry_key_schema(), allow_create).await
    }

    /// [`ensure_schema`](Self::ensure_schema) bounded by `timeout`.
    pub async fn ensure_schema_within(
        &self,
        table: &str,
        allow_create: bool,
        timeout: Duration,
    ) -> Result<(), RepoError> {
        with_deadline("initialize", table, timeout, self.ensure_schema(table, allow_create)).await
    }

    /// Make sure `table` exists with `key_schema` and is active.
    pub async fn ensure_table(&self, table: &str, key_schema: &KeySchema, allow_create: bool) -> Result<(), RepoError> {
        let description = match self.store.describe_table(table).await? {
            Some(description) => description,
            None if !allow_create => {
                warn!("table '{table}' does not exist and creation is not allowed");
                return Err(SchemaError::creation_not_allowed(table).into());
            }
            None => {
                match self.store.create_table(table, key_schema).await {
                    Ok(()) => info!("creating table '{table}' keyed by '{}'", key_schema.partition_key),
                    Err(StoreError::TableAlreadyExists(_)) => {
                        debug!("table '{table}' is being created by another initializer");
                    }
                    Err(err) => return Err(err.into()),
                }
                self.wait_until_active(table).await?
            }
        };

        validate(&description, key_schema)?;

        if description.status != TableStatus::Active {
            self.wait_until_active(table).await?;
        }
        debug!("table '{table}' is ready");
        Ok(())
    }

    /// [`ensure_table`](Self::ensure_table) bounded by `timeout`.
    pub async fn ensure_table_within(
        &self,
        table: &str,
        key_schema: &KeySchema,
        allow_create: bool,
        timeout: Duration,
    ) -> Result<(), RepoError> {
        with_deadline("initialize", table, timeout, self.ensure_table(table, key_schema, allow_create)).await
    }

    async fn wait_until_active(&self, table: &str) -> Result<TableDescription, RepoError> {
        loop {
            match self.store.describe_table(table).await? {
                Some(description) if description.status == TableStatus::Active => return Ok(description),
                Some(_) => {
                    debug!("table '{table}' is still being created");
                    tokio::time::sleep(self.poll_interval).await;
                }
                None => {
                    warn!("table '{table}' disappeared while waiting for it to become active");
                    return Err(RepoError::not_initialized(table));
                }
            }
        }
    }
}

fn validate(description: &TableDescription, expected: &KeySchema) -> Result<(), SchemaError> {
    if &description.key_schema == expected {
        Ok(())
    } else {
        warn!(
            "table '{}' has key schema {:?}, expected {:?}",
            description.name, description.key_schema, expected
        );
        Err(SchemaError::creation_not_allowed(&description.name))
    }
}
