//! Redis-backed store.
//!
//! Table descriptors and items are plain JSON strings, so no Redis modules
//! are required. Conditional puts run in a Lua script so the check and the
//! write happen atomically on the server.

use std::fmt::Debug;

use chrono::Utc;
use redis::{aio::ConnectionManager, cmd};
use serde_json::Value;

use super::{Item, KeySchema, KeyValueStore, PutCondition, ScanPage, TableDescription, TableStatus};
use crate::{errors::StoreError, keys::KeyContext, runtime::scripts::CONDITIONAL_PUT_SCRIPT};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("prefix", &self.prefix).finish()
    }
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix)
    }

    async fn require_table(&self, table: &str) -> Result<(), StoreError> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound(table.to_string()))
        }
    }
}

fn parse_item(raw: &str) -> Result<Item, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::codec("stored item is not a JSON object")),
        Err(err) => Err(StoreError::codec(format!("failed to parse stored item: {err}"))),
    }
}

impl KeyValueStore for RedisStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = cmd("EXISTS").arg(self.keys().table(table)).query_async(&mut conn).await?;
        Ok(exists)
    }

    async fn create_table(&self, table: &str, key_schema: &KeySchema) -> Result<(), StoreError> {
        // Redis has no provisioning delay, so the descriptor is written active.
        let description = TableDescription {
            name: table.to_string(),
            key_schema: key_schema.clone(),
            status: TableStatus::Active,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_string(&description)
            .map_err(|err| StoreError::codec(format!("failed to serialize table descriptor: {err}")))?;

        let mut conn = self.conn.clone();
        let created: Option<String> = cmd("SET")
            .arg(self.keys().table(table))
            .arg(payload)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        match created {
            Some(_) => Ok(()),
            None => Err(StoreError::TableAlreadyExists(table.to_string())),
        }
    }

    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = cmd("GET").arg(self.keys().table(table)).query_async(&mut conn).await?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|err| StoreError::codec(format!("failed to parse descriptor of table '{table}': {err}")))
        })
        .transpose()
    }

    async fn put_item(&self, table: &str, item: Item, condition: Option<PutCondition>) -> Result<(), StoreError> {
        let keys = self.keys();
        let payload = serde_json::to_string(&item)
            .map_err(|err| StoreError::codec(format!("failed to serialize item: {err}")))?;
        let condition = match condition {
            Some(condition) => serde_json::to_string(&condition)
                .map_err(|err| StoreError::codec(format!("failed to serialize condition: {err}")))?,
            None => String::new(),
        };

        let mut invocation = CONDITIONAL_PUT_SCRIPT.prepare_invoke();
        invocation.key(keys.table(table));
        invocation.arg(payload);
        invocation.arg(keys.item_prefix(table));
        invocation.arg(condition);

        let mut conn = self.conn.clone();
        let raw: String = invocation.invoke_async(&mut conn).await?;
        let response: Value = serde_json::from_str(&raw)
            .map_err(|err| StoreError::backend(format!("failed to parse lua response: {err}")))?;

        match response.get("error").and_then(Value::as_str) {
            None => Ok(()),
            Some("condition_failed") => Err(StoreError::ConditionFailed),
            Some("table_not_found") => Err(StoreError::TableNotFound(table.to_string())),
            Some("missing_key") => Err(StoreError::codec(format!(
                "item is missing partition key '{}'",
                response.get("partition_key").and_then(Value::as_str).unwrap_or_default()
            ))),
            Some(other) => Err(StoreError::backend(other.to_string())),
        }
    }

    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        let keys = self.keys();
        let mut conn = self.conn.clone();
        let (exists, raw): (bool, Option<String>) = redis::pipe()
            .atomic()
            .cmd("EXISTS")
            .arg(keys.table(table))
            .cmd("GET")
            .arg(keys.item(table, key))
            .query_async(&mut conn)
            .await?;
        if !exists {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        raw.as_deref().map(parse_item).transpose()
    }

    async fn scan(&self, table: &str, cursor: Option<String>, limit: usize) -> Result<ScanPage, StoreError> {
        self.require_table(table).await?;

        let cursor: u64 = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::backend(format!("invalid scan cursor '{raw}'")))?,
            None => 0,
        };

        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(self.keys().item_pattern(table))
            .arg("COUNT")
            .arg(limit.max(1))
            .query_async(&mut conn)
            .await?;

        let mut items = Vec::with_capacity(keys.len());
        if !keys.is_empty() {
            let values: Vec<Option<String>> = cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            // keys deleted between SCAN and MGET come back as nil
            for raw in values.into_iter().flatten() {
                items.push(parse_item(&raw)?);
            }
        }

        Ok(ScanPage {
            items,
            next_cursor: (next_cursor != 0).then(|| next_cursor.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_item_rejects_non_objects() {
        assert!(parse_item(r#"{"changeId":"c1"}"#).is_ok());
        assert!(matches!(parse_item("[1,2]"), Err(StoreError::Codec(_))));
        assert!(matches!(parse_item("not json"), Err(StoreError::Codec(_))));
    }
}
