//! Migration lock.
//!
//! One item per lock key records the current owner and when its lease runs
//! out. [`LockRepository`] changes that item only through conditional puts,
//! so two owners racing for a free or expired lock cannot both win.
//! [`LockManager`] layers acquisition retries, lease refresh and release on
//! top of it for a single owner.

mod manager;
mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    entry::ATTR_REVISION,
    errors::LockError,
    store::{AttributeType, Item, KeySchema},
};

pub use self::manager::{LockManager, LockOptions};
pub use self::repository::LockRepository;

pub const DEFAULT_LOCK_TABLE: &str = "migrationLock";
pub const DEFAULT_LOCK_KEY: &str = "DEFAULT_KEY";

pub const ATTR_LOCK_KEY: &str = "key";

/// Key layout every lock table must have.
pub fn lock_key_schema() -> KeySchema {
    KeySchema::partition(ATTR_LOCK_KEY, AttributeType::String)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    LockHeld,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    pub key: String,
    pub status: LockStatus,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LockEntry {
    pub fn held(key: impl Into<String>, owner: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            status: LockStatus::LockHeld,
            owner: owner.into(),
            expires_at,
        }
    }

    /// Held and not yet expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::LockHeld && self.expires_at > now
    }

    /// Someone other than `owner` holds an unexpired lease.
    pub fn blocks(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.owner != owner && self.is_active_at(now)
    }

    pub fn to_item(&self) -> Result<Item, LockError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(LockError::InvalidRecord {
                message: "lock did not encode as an attribute map".to_string(),
            }),
            Err(err) => Err(LockError::InvalidRecord {
                message: format!("failed to encode lock '{}': {err}", self.key),
            }),
        }
    }

    pub fn from_item(mut item: Item) -> Result<Self, LockError> {
        item.remove(ATTR_REVISION);
        serde_json::from_value(Value::Object(item)).map_err(|err| LockError::InvalidRecord {
            message: format!("failed to decode lock: {err}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn stored_layout_uses_camel_case_and_screaming_status() {
        let expires_at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let item = LockEntry::held(DEFAULT_LOCK_KEY, "host-a", expires_at).to_item().unwrap();
        assert_eq!(
            Value::Object(item),
            json!({
                "key": "DEFAULT_KEY",
                "status": "LOCK_HELD",
                "owner": "host-a",
                "expiresAt": "2026-01-02T03:04:05Z",
            })
        );
    }

    #[test]
    fn revision_is_ignored_when_decoding() {
        let Value::Object(item) = json!({
            "key": "k",
            "status": "RELEASED",
            "owner": "o",
            "expiresAt": "2026-01-02T03:04:05Z",
            "_revision": 4,
        }) else {
            unreachable!()
        };
        let entry = LockEntry::from_item(item).unwrap();
        assert_eq!(entry.status, LockStatus::Released);
    }

    #[test]
    fn only_unexpired_foreign_leases_block() {
        let now = Utc::now();
        let lease = LockEntry::held("k", "owner-a", now + Duration::seconds(5));
        assert!(lease.blocks("owner-b", now));
        assert!(!lease.blocks("owner-a", now));
        assert!(!lease.blocks("owner-b", now + Duration::seconds(6)));

        let released = LockEntry {
            status: LockStatus::Released,
            ..lease
        };
        assert!(!released.blocks("owner-b", now));
    }

    #[test]
    fn malformed_records_are_reported() {
        let Value::Object(item) = json!({"key": "k", "owner": 3}) else { unreachable!() };
        assert!(matches!(LockEntry::from_item(item), Err(LockError::InvalidRecord { .. })));
    }
}
