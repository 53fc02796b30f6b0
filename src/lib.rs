//! Rotating RSA keyring.
//!
//! A [`Keychain`] hands out one current [`SigningKey`] at a time, replaces it
//! once its rotation frequency has elapsed, and keeps serving the matching
//! [`VerifierKey`] for the whole verification period. Keys live in a
//! pluggable [`Store`] shared by every process of a deployment.
//!
//! ```no_run
//! use jiff::SignedDuration;
//! use rotating_keyring::{Keychain, MemoryStore, Options};
//!
//! let options = Options::default().with_rotation_frequency(SignedDuration::from_mins(30));
//! let keychain = Keychain::with_options(MemoryStore::new(), options)?;
//!
//! let signing_key = keychain.signing_key()?;
//! let verifier = keychain.get_verifier(signing_key.id())?;
//! println!("{}", verifier.to_pem()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod clock;
mod codec;
pub mod id;
mod janitor;
mod keychain;
mod options;
mod record_serde;
mod signing_key;
mod single_flight;
pub mod store;
mod verifier_key;

#[cfg(test)]
mod testutil;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{public_record_id, PUBLIC_KEY_ID_PREFIX};
pub use janitor::Janitor;
pub use keychain::{Error, Keychain};
pub use options::{Options, DEFAULT_KEY_SIZE, DEFAULT_ROTATION_FREQUENCY, MIN_KEY_SIZE};
pub use signing_key::SigningKey;
pub use store::{KeyRecord, LockGuard, LockToken, Store};
#[cfg(feature = "memory")]
pub use store::MemoryStore;
pub use verifier_key::VerifierKey;

pub mod error {
    pub use crate::codec::CodecError;
    pub use crate::id::IdError;
    pub use crate::keychain::RotationError;
    pub use crate::options::OptionsError;
    pub use crate::store::StoreError;
}
