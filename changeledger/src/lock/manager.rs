use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};

use super::{DEFAULT_LOCK_KEY, LockEntry, LockRepository};
use crate::{errors::LockError, id::generate_lock_owner, store::KeyValueStore};

/// Shortest wait between attempts when the current lease is about to run out.
const MIN_RETRY_WAIT: Duration = Duration::from_millis(500);
const MIN_REFRESH_MARGIN: Duration = Duration::from_secs(1);
/// Share of the lease, in percent, left when a refresh becomes due.
const REFRESH_MARGIN_PERCENT: u32 = 33;

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Lease length written on every acquire and refresh.
    pub acquired_for: Duration,
    /// Give up acquiring after this long.
    pub quit_trying_after: Duration,
    /// Delay between acquisition attempts, and between background refresh checks.
    pub try_frequency: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            acquired_for: Duration::from_secs(60),
            quit_trying_after: Duration::from_secs(3 * 60),
            try_frequency: Duration::from_secs(1),
        }
    }
}

impl LockOptions {
    /// How long before expiry a lease is refreshed: a third of the lease,
    /// at least one second, never more than the lease itself.
    pub fn refresh_margin(&self) -> Duration {
        (self.acquired_for * REFRESH_MARGIN_PERCENT / 100)
            .max(MIN_REFRESH_MARGIN)
            .min(self.acquired_for)
    }
}

#[derive(Debug, Default)]
struct HeldState {
    expires_at: Option<DateTime<Utc>>,
    released: bool,
}

/// Holds one lock key on behalf of one owner.
///
/// A released manager is spent: `acquire` and `ensure` fail with
/// [`LockError::Released`] afterwards.
pub struct LockManager<S> {
    repository: LockRepository<S>,
    key: String,
    owner: String,
    options: LockOptions,
    state: Mutex<HeldState>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for LockManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl<S> LockManager<S>
where
    S: KeyValueStore,
{
    /// Manager for the default key with a fresh owner id.
    pub fn new(repository: LockRepository<S>, options: LockOptions) -> Self {
        Self {
            repository,
            key: DEFAULT_LOCK_KEY.to_string(),
            owner: generate_lock_owner(),
            options,
            state: Mutex::new(HeldState::default()),
            refresher: Mutex::new(None),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Expiry of the lease as last written by this manager.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expires_at
    }

    /// Whether this manager's lease has not run out yet, judged locally.
    pub fn is_lock_held(&self) -> bool {
        let state = self.state.lock();
        !state.released && state.expires_at.is_some_and(|expires_at| Utc::now() <= expires_at)
    }

    /// Take the lock, retrying while another owner holds it.
    ///
    /// Fails with [`LockError::QuitTrying`] once `quit_trying_after` has passed.
    pub async fn acquire(&self) -> Result<(), LockError> {
        self.check_not_released()?;
        let started = Instant::now();
        let deadline = started + self.options.quit_trying_after;

        loop {
            let expires_at = lease_end(Utc::now(), self.options.acquired_for);
            let entry = LockEntry::held(&self.key, &self.owner, expires_at);
            match self.repository.insert_update(&entry).await {
                Ok(()) => {
                    self.record_lease(expires_at)?;
                    info!("acquired lock '{}' as '{}' until {expires_at}", self.key, self.owner);
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!("giving up on lock '{}' after {:?}: {err}", self.key, started.elapsed());
                        return Err(LockError::QuitTrying {
                            key: self.key.clone(),
                            after: started.elapsed(),
                        });
                    }
                    let wait = self.retry_wait(&err).min(deadline - now);
                    debug!("lock '{}' not acquired ({err}), retrying in {wait:?}", self.key);
                    tokio::time::sleep(wait).await;
                    self.check_not_released()?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Refresh the lease if it is within the refresh margin of expiring.
    ///
    /// Fails without retrying when the lock now belongs to someone else.
    pub async fn ensure(&self) -> Result<(), LockError> {
        self.check_not_released()?;
        if let Some(expires_at) = self.expires_at()
            && !self.refresh_due(expires_at, Utc::now())
        {
            return Ok(());
        }

        let expires_at = lease_end(Utc::now(), self.options.acquired_for);
        let entry = LockEntry::held(&self.key, &self.owner, expires_at);
        match self.repository.update_if_same_owner(&entry).await {
            Ok(()) => {
                self.record_lease(expires_at)?;
                debug!("refreshed lock '{}' until {expires_at}", self.key);
                Ok(())
            }
            Err(err @ (LockError::Lost { .. } | LockError::HeldByOther { .. })) => {
                warn!("lock '{}' slipped away from '{}': {err}", self.key, self.owner);
                self.state.lock().expires_at = None;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Give the lock up. Backend failures are logged, not returned; the
    /// lease then simply runs out.
    pub async fn release(&self) {
        let already_released = {
            let mut state = self.state.lock();
            state.expires_at = None;
            std::mem::replace(&mut state.released, true)
        };
        if let Some(handle) = self.refresher.lock().take() {
            handle.abort();
        }
        if already_released {
            return;
        }
        match self.repository.remove_by_key_and_owner(&self.key, &self.owner).await {
            Ok(true) => info!("released lock '{}'", self.key),
            Ok(false) => debug!("lock '{}' was not held by '{}' at release", self.key, self.owner),
            Err(err) => warn!("failed to release lock '{}': {err}", self.key),
        }
    }

    /// Keep the lease alive from a background task until release or loss.
    pub fn start_refresher(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.options.try_frequency).await;
                match manager.ensure().await {
                    Ok(()) => {}
                    Err(LockError::Repo(err)) if err.is_retryable() => {
                        warn!("refreshing lock '{}' failed, will retry: {err}", manager.key);
                    }
                    Err(LockError::Released { .. }) => break,
                    Err(err) => {
                        warn!("stopped refreshing lock '{}': {err}", manager.key);
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.refresher.lock().replace(handle) {
            previous.abort();
        }
    }

    fn check_not_released(&self) -> Result<(), LockError> {
        if self.state.lock().released {
            Err(LockError::Released { key: self.key.clone() })
        } else {
            Ok(())
        }
    }

    /// Store a newly written lease unless a release raced the write.
    fn record_lease(&self, expires_at: DateTime<Utc>) -> Result<(), LockError> {
        let mut state = self.state.lock();
        if state.released {
            return Err(LockError::Released { key: self.key.clone() });
        }
        state.expires_at = Some(expires_at);
        Ok(())
    }

    fn refresh_due(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let margin = TimeDelta::from_std(self.options.refresh_margin()).unwrap_or(TimeDelta::MAX);
        expires_at.checked_sub_signed(margin).is_none_or(|due| now >= due)
    }

    fn retry_wait(&self, err: &LockError) -> Duration {
        let frequency = self.options.try_frequency;
        let LockError::HeldByOther { until, .. } = err else {
            return frequency;
        };
        let remaining = (*until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if frequency > remaining {
            remaining.max(MIN_RETRY_WAIT)
        } else {
            frequency
        }
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
