//! In-process [`Store`] backend.
//!
//! Records live in a `HashMap` behind a `parking_lot::RwLock`. The lock is
//! leased: once `lease` has elapsed the grant expires, a new `lock()` call
//! takes over and the stale token is refused by `add`.

use std::{collections::HashMap, sync::Arc};

use jiff::{SignedDuration, Timestamp};
use parking_lot::{Mutex, RwLock};

use super::{KeyRecord, LockToken, Store, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::id;

/// How long a lock grant lasts when never released
pub const DEFAULT_LEASE: SignedDuration = SignedDuration::from_secs(30);

const LOCK_TOKEN_LENGTH: usize = 32;

#[derive(Debug)]
struct Lease {
    token: LockToken,
    expires_at: Timestamp,
}

/// Shareable in-memory key store with a leased lock
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, KeyRecord>>,
    lease: Mutex<Option<Lease>>,
    lease_duration: SignedDuration,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lease: Mutex::new(None),
            lease_duration: DEFAULT_LEASE,
            clock: Arc::new(SystemClock),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease(mut self, lease: SignedDuration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Number of stored records, expired or not
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn holds_lease(&self, token: &LockToken, now: Timestamp) -> bool {
        self.lease
            .lock()
            .as_ref()
            .is_some_and(|lease| lease.token == *token && now <= lease.expires_at)
    }
}

impl Store for MemoryStore {
    #[tracing::instrument(skip_all, fields(count = records.len()))]
    fn add(&self, lock: &LockToken, records: &[KeyRecord]) -> Result<(), StoreError> {
        if !self.holds_lease(lock, self.clock.now()) {
            return Err(StoreError::InvalidLock);
        }

        let mut stored = self.records.write();
        if let Some(taken) = records.iter().find(|record| stored.contains_key(&record.id)) {
            return Err(StoreError::KeyIdConflict {
                id: taken.id.clone(),
            });
        }
        // A batch repeating one id conflicts with itself
        let mut batch: HashMap<&str, &KeyRecord> = HashMap::with_capacity(records.len());
        for record in records {
            if batch.insert(record.id.as_str(), record).is_some() {
                return Err(StoreError::KeyIdConflict {
                    id: record.id.clone(),
                });
            }
        }

        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    fn find(&self, id: &str) -> Result<KeyRecord, StoreError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound { id: id.to_owned() })
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<KeyRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn lock(&self) -> Result<LockToken, StoreError> {
        let now = self.clock.now();
        let mut lease = self.lease.lock();
        if let Some(held) = lease.as_ref() {
            if now <= held.expires_at {
                return Err(StoreError::LockOccupied);
            }
            tracing::debug!(expired_at = %held.expires_at, "taking over expired lock lease");
        }

        let token = id::generate(id::ALPHANUMERIC, LOCK_TOKEN_LENGTH)
            .map(LockToken::new)
            .map_err(|source| StoreError::Backend {
                source: Box::new(source),
            })?;
        let expires_at = now.checked_add(self.lease_duration).unwrap_or(Timestamp::MAX);

        *lease = Some(Lease {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    fn unlock(&self, lock: &LockToken) -> Result<(), StoreError> {
        let mut lease = self.lease.lock();
        if lease.as_ref().is_some_and(|held| held.token == *lock) {
            *lease = None;
        }
        Ok(())
    }
}
