//! Key lifecycle and rotation engine.
//!
//! A [`Keychain`] always holds one current [`SigningKey`]. Once that key
//! passes its rotation instant, the next caller of
//! [`signing_key`](Keychain::signing_key) starts a rotation; every caller
//! arriving meanwhile waits for that same attempt and shares its outcome.
//!
//! # Rotation
//!
//! ```text
//! signing_key() ─► cached key still current? ── yes ──► return it
//!                              │ no
//!                              ▼
//!                  join or start the in-flight rotation
//!                              │
//!                              ▼
//!                   take the store lock (fail fast)
//!                              │
//!              live private record from a peer process?
//!                 │ yes                        │ no
//!                 ▼                            ▼
//!             adopt it           mint pair, persist both halves
//!                 └──────────────┬─────────────┘
//!                                ▼
//!                    publish to cache, unlock
//! ```
//!
//! Keychains in several processes converge because they all adopt the live
//! private key expiring soonest. This gives eventual, not strict, agreement
//! when processes bootstrap at the same time.

use std::sync::Arc;

use jiff::Timestamp;
use parking_lot::RwLock;
use snafu::{ResultExt, Snafu};

use crate::codec::{self, CodecError};
use crate::id::IdError;
use crate::janitor::Janitor;
use crate::options::{Options, OptionsError};
use crate::single_flight::Coalescer;
use crate::store::{sort_by_expiry, KeyRecord, LockGuard, Store, StoreError};
use crate::{SigningKey, VerifierKey};

/// Why establishing a signing key failed
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RotationError {
    #[snafu(display("acquiring the store lock"))]
    Lock { source: StoreError },
    #[snafu(display("listing stored keys"))]
    List { source: StoreError },
    #[snafu(display("persisting key pair {id}"))]
    Persist { id: String, source: StoreError },
    #[snafu(display("generating RSA key"))]
    Generate { source: rsa::Error },
    #[snafu(display("generating key id"))]
    Identifier { source: IdError },
    #[snafu(display("encoding new key pair"))]
    Encode { source: CodecError },
    #[snafu(display("decoding stored signing key"))]
    Decode { source: CodecError },
    #[snafu(display("computing key expiry"))]
    Timestamp { source: jiff::Error },
    #[snafu(display("rotation abandoned by a panicking caller"))]
    Abandoned,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid keychain options"))]
    InvalidOptions { source: OptionsError },
    #[snafu(display("establishing the initial signing key"))]
    Initialize { source: RotationError },
    /// Shared by every caller coalesced into the failed attempt
    #[snafu(display("rotating the signing key"))]
    Rotation { source: Arc<RotationError> },
    #[snafu(display("key {id} not found"))]
    KeyNotFound { id: String },
    #[snafu(display("reading stored keys"))]
    Store { source: StoreError },
    #[snafu(display("decoding stored key"), context(suffix(Ctx)))]
    Decode { source: CodecError },
    #[snafu(display("starting the janitor thread"))]
    SpawnJanitor { source: std::io::Error },
}

impl Error {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}

type RotationOutcome = Result<Arc<SigningKey>, Arc<RotationError>>;

/// Issues the current signing key and serves the verifier keys still valid
pub struct Keychain<S> {
    store: S,
    options: Options,
    current: RwLock<Arc<SigningKey>>,
    rotation: Coalescer<RotationOutcome>,
}

impl<S> std::fmt::Debug for Keychain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keychain")
            .field("current", &self.current.read().id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: Store> Keychain<S> {
    /// Keychain with default options, see [`Keychain::with_options`]
    pub fn new(store: S) -> Result<Self, Error> {
        Self::with_options(store, Options::default())
    }

    /// Validates `options` and establishes the first current key.
    ///
    /// A live private key already in the store is adopted; otherwise a pair is
    /// minted under the store lock. Failing here means no keychain exists at
    /// all, there is no half-initialized state to recover from.
    #[tracing::instrument(skip_all)]
    pub fn with_options(store: S, options: Options) -> Result<Self, Error> {
        options.validate().context(InvalidOptionsSnafu)?;
        let current = establish(&store, &options).context(InitializeSnafu)?;

        Ok(Self {
            store,
            options,
            current: RwLock::new(Arc::new(current)),
            rotation: Coalescer::default(),
        })
    }

    /// Key to sign with, rotating first if the cached one is past its rotation instant
    #[tracing::instrument(skip(self))]
    pub fn signing_key(&self) -> Result<Arc<SigningKey>, Error> {
        let current = self.current();
        if current.is_current_at(self.now()) {
            return Ok(current);
        }

        tracing::debug!(key_id = %current.id, "signing key expired");
        self.coalesced_rotation(true)
    }

    /// Verifier for a key id, unless unknown or past its verification window
    #[tracing::instrument(skip(self))]
    pub fn get_verifier(&self, id: &str) -> Result<VerifierKey, Error> {
        let record = match self.store.find(&codec::public_record_id(id)) {
            Ok(record) => record,
            Err(StoreError::KeyNotFound { .. }) => return KeyNotFoundSnafu { id }.fail(),
            Err(source) => return Err(Error::Store { source }),
        };

        // Logically expired even if the backend still has it
        if self.now() > record.expires_at {
            return KeyNotFoundSnafu { id }.fail();
        }

        codec::decode_verifier_key(&record).context(DecodeCtx)
    }

    /// Every verifier still valid, the one expiring soonest first
    #[tracing::instrument(skip(self))]
    pub fn list_verifiers(&self) -> Result<Vec<VerifierKey>, Error> {
        let now = self.now();
        let mut records: Vec<KeyRecord> = self
            .store
            .list()
            .context(StoreSnafu)?
            .into_iter()
            .filter(|record| !record.is_private && record.is_live(now))
            .collect();
        sort_by_expiry(&mut records);

        records
            .iter()
            .map(codec::decode_verifier_key)
            .collect::<Result<_, _>>()
            .context(DecodeCtx)
    }

    /// Replaces the current key with a newly minted one, whatever its age
    #[tracing::instrument(skip(self))]
    pub fn rotate(&self) -> Result<(), Error> {
        self.coalesced_rotation(false).map(drop)
    }

    /// Deletes every record past its expiry and returns how many went away.
    ///
    /// Does nothing when the store expires records on its own.
    #[tracing::instrument(skip(self))]
    pub fn purge_expired(&self) -> Result<usize, Error> {
        if self.store.handles_ttl() {
            return Ok(0);
        }

        let now = self.now();
        let mut purged = 0;
        for record in self.store.list().context(StoreSnafu)? {
            if now <= record.expires_at {
                continue;
            }
            match self.store.delete(&record.id) {
                Ok(()) => purged += 1,
                Err(error) => {
                    tracing::warn!(record_id = %record.id, %error, "failed to delete expired key")
                }
            }
        }

        if purged > 0 {
            tracing::debug!(purged, "purged expired keys");
        }
        Ok(purged)
    }

    /// Id of the cached key, without checking whether it is due for rotation
    pub fn current_key_id(&self) -> String {
        self.current.read().id.clone()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn current(&self) -> Arc<SigningKey> {
        Arc::clone(&self.current.read())
    }

    fn now(&self) -> Timestamp {
        self.options.clock().now()
    }

    fn coalesced_rotation(&self, reuse_existing: bool) -> Result<Arc<SigningKey>, Error> {
        let outcome = self.rotation.run(|| {
            self.rotate_locked(reuse_existing).map_err(|error| {
                tracing::error!(%error, reuse_existing, "key rotation failed");
                Arc::new(error)
            })
        });

        match outcome {
            Some(Ok(key)) => Ok(key),
            Some(Err(source)) => Err(Error::Rotation { source }),
            None => Err(Error::Rotation {
                source: Arc::new(RotationError::Abandoned),
            }),
        }
    }

    /// Only the cache is touched after the store accepted the new key, so a
    /// failure anywhere leaves the previous key published.
    fn rotate_locked(&self, reuse_existing: bool) -> Result<Arc<SigningKey>, RotationError> {
        let guard = LockGuard::acquire(&self.store).context(LockSnafu)?;

        let reusable = if reuse_existing {
            soonest_live_signing_key(&self.store, &self.options)?
        } else {
            None
        };
        let key = match reusable {
            Some(key) => {
                tracing::debug!(key_id = %key.id, "reusing signing key minted elsewhere");
                key
            }
            None => mint_and_persist(&self.store, &self.options, &guard)?,
        };

        let key = Arc::new(key);
        *self.current.write() = Arc::clone(&key);
        drop(guard);
        Ok(key)
    }
}

impl<S: Store + 'static> Keychain<S> {
    /// Purges expired keys in the background every
    /// [`purge_interval`](Options::purge_interval)
    pub fn spawn_janitor(self: &Arc<Self>) -> Result<Janitor, Error> {
        let interval = self.options.purge_interval().unsigned_abs();
        Janitor::spawn(self, interval).context(SpawnJanitorSnafu)
    }
}

fn establish<S: Store>(store: &S, options: &Options) -> Result<SigningKey, RotationError> {
    if let Some(key) = soonest_live_signing_key(store, options)? {
        tracing::info!(key_id = %key.id, "adopted stored signing key");
        return Ok(key);
    }

    let guard = LockGuard::acquire(store).context(LockSnafu)?;
    // Another process may have minted a key while we were waiting for the lock
    if let Some(key) = soonest_live_signing_key(store, options)? {
        tracing::info!(key_id = %key.id, "adopted stored signing key");
        return Ok(key);
    }
    mint_and_persist(store, options, &guard)
}

fn soonest_live_signing_key<S: Store>(
    store: &S,
    options: &Options,
) -> Result<Option<SigningKey>, RotationError> {
    let now = options.clock().now();
    let mut records: Vec<KeyRecord> = store
        .list()
        .context(ListSnafu)?
        .into_iter()
        .filter(|record| record.is_private && record.is_live(now))
        .collect();
    sort_by_expiry(&mut records);

    records
        .first()
        .map(|record| codec::decode_signing_key(record, options.verification_grace()))
        .transpose()
        .context(DecodeSnafu)
}

fn mint_and_persist<S: Store>(
    store: &S,
    options: &Options,
    guard: &LockGuard<'_, S>,
) -> Result<SigningKey, RotationError> {
    let key = SigningKey::generate(options, options.clock().now())?;
    let records = codec::encode_pair(&key).context(EncodeSnafu)?;
    store
        .add(guard.token(), &records)
        .context(PersistSnafu { id: &key.id })?;

    tracing::info!(
        key_id = %key.id,
        rotated_at = %key.rotated_at,
        verifiable_until = %key.verifiable_until,
        "minted signing key"
    );
    Ok(key)
}
