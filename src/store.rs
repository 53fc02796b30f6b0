//! Persistence contract consumed by the keychain.
//!
//! A [`Store`] holds [`KeyRecord`]s in a single flat namespace and offers one
//! backend-wide advisory lock. The keychain only takes the lock around
//! "mint and persist a new key pair"; reads never lock.
//!
//! Backends must bound the lifetime of a held lock with a lease, so that a
//! crashed holder cannot wedge other processes. The keychain does not enforce
//! this itself.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

use jiff::Timestamp;
use snafu::Snafu;
use std::sync::Arc;

/// Boxed error produced by a concrete backend
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("key {id} not found"))]
    KeyNotFound { id: String },
    #[snafu(display("key id {id} is already taken"))]
    KeyIdConflict { id: String },
    #[snafu(display("lock token is not the current lock holder"))]
    InvalidLock,
    #[snafu(display("lock is held by someone else"))]
    LockOccupied,
    #[snafu(display("storage backend failure"))]
    Backend { source: BoxError },
}

/// Proof of ownership of the backend lock, meaningful for a single lock/unlock pair
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LockToken").field(&"<token>").finish()
    }
}

/// One half of a key pair as the backend sees it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyRecord {
    pub id: String,
    pub is_private: bool,
    /// Serialized as an RFC 3339 string
    pub expires_at: Timestamp,
    /// DER encoding of the key, opaque to the backend
    #[serde(with = "crate::record_serde::hex_bytes")]
    pub data: Vec<u8>,
}

impl KeyRecord {
    pub(crate) fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// Orders records from the soonest to the latest expiry
pub fn sort_by_expiry(records: &mut [KeyRecord]) {
    records.sort_by_key(|record| record.expires_at);
}

/// Persists key records for the keychain.
pub trait Store: Send + Sync {
    /// Persists every record of the batch, or none of them.
    ///
    /// Fails with [`StoreError::KeyIdConflict`] if any id is already present,
    /// and with [`StoreError::InvalidLock`] if `lock` is not the current holder.
    /// A backend with native TTL support may expire records at `expires_at`.
    fn add(&self, lock: &LockToken, records: &[KeyRecord]) -> Result<(), StoreError>;

    /// Fails with [`StoreError::KeyNotFound`] when nothing is stored under `id`
    fn find(&self, id: &str) -> Result<KeyRecord, StoreError>;

    /// Removing an absent id is not an error
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Every stored record, in no particular order
    fn list(&self) -> Result<Vec<KeyRecord>, StoreError>;

    /// Takes the backend-wide lock without waiting.
    ///
    /// Fails immediately with [`StoreError::LockOccupied`] when someone holds
    /// it. The grant must expire on its own after a bounded lease.
    fn lock(&self) -> Result<LockToken, StoreError>;

    /// Releases the lock if `lock` holds it, does nothing otherwise
    fn unlock(&self, lock: &LockToken) -> Result<(), StoreError>;

    /// Whether the backend deletes records on its own once they expire
    fn handles_ttl(&self) -> bool {
        false
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn add(&self, lock: &LockToken, records: &[KeyRecord]) -> Result<(), StoreError> {
        (**self).add(lock, records)
    }

    fn find(&self, id: &str) -> Result<KeyRecord, StoreError> {
        (**self).find(id)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete(id)
    }

    fn list(&self) -> Result<Vec<KeyRecord>, StoreError> {
        (**self).list()
    }

    fn lock(&self) -> Result<LockToken, StoreError> {
        (**self).lock()
    }

    fn unlock(&self, lock: &LockToken) -> Result<(), StoreError> {
        (**self).unlock(lock)
    }

    fn handles_ttl(&self) -> bool {
        (**self).handles_ttl()
    }
}

impl<S: Store + ?Sized> Store for &S {
    fn add(&self, lock: &LockToken, records: &[KeyRecord]) -> Result<(), StoreError> {
        (**self).add(lock, records)
    }

    fn find(&self, id: &str) -> Result<KeyRecord, StoreError> {
        (**self).find(id)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete(id)
    }

    fn list(&self) -> Result<Vec<KeyRecord>, StoreError> {
        (**self).list()
    }

    fn lock(&self) -> Result<LockToken, StoreError> {
        (**self).lock()
    }

    fn unlock(&self, lock: &LockToken) -> Result<(), StoreError> {
        (**self).unlock(lock)
    }

    fn handles_ttl(&self) -> bool {
        (**self).handles_ttl()
    }
}

/// Held backend lock, released when dropped
pub struct LockGuard<'a, S: Store + ?Sized> {
    store: &'a S,
    token: LockToken,
}

impl<'a, S: Store + ?Sized> LockGuard<'a, S> {
    pub fn acquire(store: &'a S) -> Result<Self, StoreError> {
        let token = store.lock()?;
        Ok(Self { store, token })
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }
}

impl<S: Store + ?Sized> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(error) = self.store.unlock(&self.token) {
            tracing::warn!(%error, "failed to release store lock");
        }
    }
}
