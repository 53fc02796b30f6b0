use jiff::SignedDuration;

use crate::Options;

/// Keys small enough to generate quickly, a minute of rotation and five of verification
pub(crate) fn small_key_options() -> Options {
    Options::default()
        .with_key_size(512)
        .with_rotation_frequency(SignedDuration::from_mins(1))
        .with_verification_period(SignedDuration::from_mins(5))
}

#[cfg(feature = "memory")]
pub(crate) use self::memory::*;

#[cfg(feature = "memory")]
mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use jiff::{SignedDuration, Timestamp};
    use parking_lot::Mutex;

    use crate::clock::ManualClock;
    use crate::codec::encode_pair;
    use crate::store::{BoxError, KeyRecord, LockGuard, LockToken, MemoryStore, Store, StoreError};
    use crate::{Keychain, Options, SigningKey};

    /// Keychain over a fresh store, both driven by the returned manual clock
    pub(crate) fn keychain_at(
        rotation_frequency: SignedDuration,
        verification_period: Option<SignedDuration>,
    ) -> (Keychain<Arc<MemoryStore>>, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new().with_clock(clock.clone()));

        let mut options = Options::default()
            .with_key_size(512)
            .with_rotation_frequency(rotation_frequency)
            .with_clock(clock.clone());
        if let Some(verification_period) = verification_period {
            options = options.with_verification_period(verification_period);
        }

        let keychain = Keychain::with_options(Arc::clone(&store), options).unwrap();
        (keychain, clock, store)
    }

    /// Mints a pair as if another process had done it at `now`
    pub(crate) fn store_minted(store: &MemoryStore, options: &Options, now: Timestamp) -> SigningKey {
        let key = SigningKey::generate(options, now).unwrap();
        let guard = LockGuard::acquire(store).unwrap();
        store.add(guard.token(), &encode_pair(&key).unwrap()).unwrap();
        key
    }

    fn injected() -> StoreError {
        StoreError::Backend {
            source: BoxError::from(std::io::Error::other("injected failure")),
        }
    }

    type LockHook = Box<dyn FnOnce(&MemoryStore) + Send>;

    /// Memory store whose operations can be made to fail on demand
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        fail_list: AtomicBool,
        fail_add: AtomicBool,
        handles_ttl: AtomicBool,
        before_lock: Mutex<Option<LockHook>>,
    }

    impl FlakyStore {
        pub(crate) fn fail_list(&self, fail: bool) {
            self.fail_list.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_add(&self, fail: bool) {
            self.fail_add.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn handle_ttl(&self, handles: bool) {
            self.handles_ttl.store(handles, Ordering::SeqCst);
        }

        /// Runs `hook` once, on the next `lock()`, before the lock is granted
        pub(crate) fn before_next_lock(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
            *self.before_lock.lock() = Some(Box::new(hook));
        }

        pub(crate) fn inner(&self) -> &MemoryStore {
            &self.inner
        }
    }

    impl Store for FlakyStore {
        fn add(&self, lock: &LockToken, records: &[KeyRecord]) -> Result<(), StoreError> {
            if self.fail_add.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.add(lock, records)
        }

        fn find(&self, id: &str) -> Result<KeyRecord, StoreError> {
            self.inner.find(id)
        }

        fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id)
        }

        fn list(&self) -> Result<Vec<KeyRecord>, StoreError> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.list()
        }

        fn lock(&self) -> Result<LockToken, StoreError> {
            let hook = self.before_lock.lock().take();
            if let Some(hook) = hook {
                hook(&self.inner);
            }
            self.inner.lock()
        }

        fn unlock(&self, lock: &LockToken) -> Result<(), StoreError> {
            self.inner.unlock(lock)
        }

        fn handles_ttl(&self) -> bool {
            self.handles_ttl.load(Ordering::SeqCst)
        }
    }
}
