//! Change entry record and its flat attribute-map encoding.
//!
//! ## Stored layout
//!
//! ```text
//! Primary Key:
//!   - changeId (String, Partition Key)
//!
//! Attributes:
//!   - executionId: String        identity, pinned once written
//!   - author: String             identity, pinned once written
//!   - changeLogClass: String
//!   - changeSetMethod: String
//!   - state: String (optional)   EXECUTED | FAILED | ROLLED_BACK | ROLLBACK_FAILED | IGNORED
//!   - type: String               EXECUTION | BEFORE_EXECUTION
//!   - timestamp: String          RFC 3339
//!   - executionMillis: Number
//!   - executionHostname: String
//!   - errorTrace: String (optional)
//!   - systemChange: Bool
//!   - metadata: any (optional)
//!   - _revision: Number          optimistic concurrency counter, store-internal
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{errors::RepoError, store::Item};

/// Partition key attribute.
pub const ATTR_CHANGE_ID: &str = "changeId";

pub const ATTR_EXECUTION_ID: &str = "executionId";

pub const ATTR_AUTHOR: &str = "author";

pub const ATTR_CHANGE_LOG_CLASS: &str = "changeLogClass";

pub const ATTR_STATE: &str = "state";

/// Revision counter kept next to the entry attributes. Never part of [`ChangeEntry`].
pub const ATTR_REVISION: &str = "_revision";

/// Outcome recorded for a change execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeState {
    Executed,
    Failed,
    RolledBack,
    RollbackFailed,
    Ignored,
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeState::Executed => "EXECUTED",
            ChangeState::Failed => "FAILED",
            ChangeState::RolledBack => "ROLLED_BACK",
            ChangeState::RollbackFailed => "ROLLBACK_FAILED",
            ChangeState::Ignored => "IGNORED",
        };
        f.write_str(label)
    }
}

/// Whether the change ran as a regular change set or as a before-execution step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    #[default]
    Execution,
    BeforeExecution,
}

/// Record of one migration execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub change_id: String,
    pub execution_id: String,
    pub author: String,
    pub change_log_class: String,
    #[serde(default)]
    pub change_set_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ChangeState>,
    #[serde(rename = "type", default)]
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub execution_millis: u64,
    #[serde(default)]
    pub execution_hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    #[serde(default)]
    pub system_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ChangeEntry {
    /// Create an executed entry stamped with the current time.
    pub fn new(
        execution_id: impl Into<String>,
        change_id: impl Into<String>,
        author: impl Into<String>,
        change_log_class: impl Into<String>,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            execution_id: execution_id.into(),
            author: author.into(),
            change_log_class: change_log_class.into(),
            change_set_method: String::new(),
            state: Some(ChangeState::Executed),
            change_type: ChangeType::Execution,
            timestamp: Utc::now(),
            execution_millis: 0,
            execution_hostname: String::new(),
            error_trace: None,
            system_change: false,
            metadata: None,
        }
    }

    pub fn with_change_set_method(mut self, method: impl Into<String>) -> Self {
        self.change_set_method = method.into();
        self
    }

    pub fn with_state(mut self, state: Option<ChangeState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_execution_millis(mut self, millis: u64) -> Self {
        self.execution_millis = millis;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Entries without a state predate state tracking and count as executed.
    pub fn is_executed(&self) -> bool {
        matches!(self.state, None | Some(ChangeState::Executed))
    }

    /// Encode as a flat attribute map keyed by the stored attribute names.
    pub fn to_item(&self) -> Result<Item, RepoError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RepoError::invalid_entry("change entry did not encode as an attribute map")),
            Err(err) => Err(RepoError::invalid_entry(format!("failed to encode change entry: {err}"))),
        }
    }

    /// Decode a stored item, ignoring store-internal attributes.
    pub fn from_item(mut item: Item) -> Result<Self, RepoError> {
        item.remove(ATTR_REVISION);
        let change_id = item
            .get(ATTR_CHANGE_ID)
            .and_then(Value::as_str)
            .unwrap_or("<missing changeId>")
            .to_string();
        serde_json::from_value(Value::Object(item))
            .map_err(|err| RepoError::invalid_entry(format!("failed to decode change entry '{change_id}': {err}")))
    }
}

/// Revision stored alongside an item; absent means the item was written without one.
pub fn item_revision(item: &Item) -> u64 {
    item.get(ATTR_REVISION).and_then(Value::as_u64).unwrap_or(0)
}
