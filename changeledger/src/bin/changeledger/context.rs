use std::path::PathBuf;

use anyhow::{Context, Result};
use changeledger::{ChangeEntryRepository, LedgerConfig, LockRepository, RedisStore};
use log::debug;

/// Settings shared by every subcommand, resolved from the config file and flags.
pub struct LedgerContext {
    pub config_path: PathBuf,
    pub config: LedgerConfig,
}

impl LedgerContext {
    /// Load `config_path` (defaults apply when the file is absent) and apply flag overrides.
    pub fn load(config_path: PathBuf, table: Option<String>) -> Result<Self> {
        let mut config = LedgerConfig::load_or_default(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        if let Some(table) = table {
            config.ledger.table = table;
        }
        Ok(Self { config_path, config })
    }

    pub fn table(&self) -> &str {
        &self.config.ledger.table
    }

    pub fn lock_table(&self) -> &str {
        &self.config.lock.table
    }

    pub async fn connect(&self) -> Result<RedisStore> {
        let url = self.config.redis_url()?;
        debug!("connecting to redis with prefix '{}'", self.config.redis.prefix);
        RedisStore::connect(&url, self.config.redis.prefix.clone())
            .await
            .context("Failed to connect to Redis")
    }

    /// Repository for the configured table. It is not initialized yet.
    pub fn repository_on(&self, store: RedisStore) -> Result<ChangeEntryRepository<RedisStore>> {
        Ok(ChangeEntryRepository::with_options(
            store,
            self.table(),
            self.config.repository_options(),
        )?)
    }

    pub fn lock_repository_on(&self, store: RedisStore) -> Result<LockRepository<RedisStore>> {
        Ok(LockRepository::with_options(
            store,
            self.lock_table(),
            self.config.repository_options(),
        )?)
    }

    /// Repository that has passed `initialize` without creating anything.
    pub async fn ready_repository(&self) -> Result<ChangeEntryRepository<RedisStore>> {
        let repository = self.repository_on(self.connect().await?)?;
        repository
            .initialize(false)
            .await
            .with_context(|| format!("Change entry table '{}' is not usable; run 'changeledger init'", self.table()))?;
        Ok(repository)
    }

    /// Lock repository whose table is known to exist.
    pub async fn ready_lock_repository(&self, store: RedisStore) -> Result<LockRepository<RedisStore>> {
        let locks = self.lock_repository_on(store)?;
        locks
            .initialize(false)
            .await
            .with_context(|| format!("Lock table '{}' is not usable; run 'changeledger init'", self.lock_table()))?;
        Ok(locks)
    }
}
