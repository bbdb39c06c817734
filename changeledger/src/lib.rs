//! Migration change-entry ledger.
//!
//! A [`ChangeEntryRepository`] records which migration changes ran, keyed by
//! `changeId`, in a table of a pluggable [`KeyValueStore`]. The
//! [`SchemaProvisioner`] makes sure that table exists before any data
//! operation. A [`LockManager`] keeps concurrent migration runs from
//! overlapping. [`MemoryStore`] and [`RedisStore`] are the bundled backends.

pub mod config;
pub mod entry;
pub mod errors;
pub mod id;
pub mod keys;
pub mod lock;
pub mod merge;
pub mod provisioner;
pub mod repository;
pub mod runtime;
pub mod store;

pub use config::LedgerConfig;
pub use entry::{ChangeEntry, ChangeState, ChangeType};
pub use errors::{ConfigError, LockError, RepoError, SchemaError, StoreError};
pub use id::generate_execution_id;
pub use lock::{LockEntry, LockManager, LockOptions, LockRepository, LockStatus, lock_key_schema};
pub use merge::merge;
pub use provisioner::{SchemaProvisioner, change_entry_key_schema};
pub use repository::{ChangeEntryRepository, Lifecycle, RepositoryOptions};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
