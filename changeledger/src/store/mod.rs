//! Key-value store seam consumed by the ledger.
//!
//! The repository only needs a table-oriented capability: create/describe a
//! table, conditional puts, point reads and a paginated scan. `MemoryStore`
//! backs tests and embedded use; `RedisStore` is the production backend.

mod memory;
mod redis_store;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Flat attribute map stored per item.
pub type Item = Map<String, Value>;

/// Scalar type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "S")]
    String,
    #[serde(rename = "N")]
    Number,
}

/// Key layout of a table. Only a partition key is modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    pub attribute_type: AttributeType,
}

impl KeySchema {
    pub fn partition(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            partition_key: name.into(),
            attribute_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub key_schema: KeySchema,
    pub status: TableStatus,
    pub created_at: DateTime<Utc>,
}

/// Guard evaluated atomically against the stored item before a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PutCondition {
    /// No item with the same key may exist.
    NotExists,
    /// An item must exist and carry exactly this `_revision`.
    RevisionEquals { revision: u64 },
}

/// One page of a table scan. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

/// Table-oriented key-value capability.
///
/// Implementations must be cheap to clone and safe to share across tasks.
/// `create_table` may complete asynchronously: callers poll `describe_table`
/// until the table reports [`TableStatus::Active`].
pub trait KeyValueStore: Clone + Send + Sync + 'static {
    fn table_exists(&self, table: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn create_table(
        &self,
        table: &str,
        key_schema: &KeySchema,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn describe_table(&self, table: &str) -> impl Future<Output = Result<Option<TableDescription>, StoreError>> + Send;

    /// Write `item`, keyed by the table's partition key attribute.
    /// Fails with [`StoreError::ConditionFailed`] when `condition` does not hold.
    fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<PutCondition>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_item(&self, table: &str, key: &str) -> impl Future<Output = Result<Option<Item>, StoreError>> + Send;

    /// Return up to roughly `limit` items starting at `cursor`.
    /// Backends may repeat an item across pages; callers deduplicate.
    fn scan(
        &self,
        table: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> impl Future<Output = Result<ScanPage, StoreError>> + Send;
}

/// Extract the string partition key value from an item.
pub(crate) fn partition_value<'a>(item: &'a Item, key_schema: &KeySchema) -> Result<&'a str, StoreError> {
    item.get(&key_schema.partition_key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| StoreError::codec(format!("item is missing partition key '{}'", key_schema.partition_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conditions_serialize_for_scripts() {
        assert_eq!(serde_json::to_value(PutCondition::NotExists).unwrap(), json!({"type": "not_exists"}));
        assert_eq!(
            serde_json::to_value(PutCondition::RevisionEquals { revision: 3 }).unwrap(),
            json!({"type": "revision_equals", "revision": 3})
        );
    }

    #[test]
    fn key_schema_uses_short_type_codes() {
        let schema = KeySchema::partition("changeId", AttributeType::String);
        assert_eq!(
            serde_json::to_value(&schema).unwrap(),
            json!({"partition_key": "changeId", "attribute_type": "S"})
        );
    }

    #[test]
    fn partition_value_requires_non_empty_string() {
        let schema = KeySchema::partition("changeId", AttributeType::String);
        let Value::Object(ok) = json!({"changeId": "c1"}) else { unreachable!() };
        assert_eq!(partition_value(&ok, &schema).unwrap(), "c1");

        let Value::Object(empty) = json!({"changeId": ""}) else { unreachable!() };
        assert!(partition_value(&empty, &schema).is_err());

        let Value::Object(numeric) = json!({"changeId": 5}) else { unreachable!() };
        assert!(partition_value(&numeric, &schema).is_err());
    }
}
