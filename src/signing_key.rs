use jiff::Timestamp;
use rsa::{RsaPrivateKey, RsaPublicKey};
use snafu::ResultExt;

use crate::keychain::{GenerateSnafu, IdentifierSnafu, RotationError, TimestampSnafu};
use crate::{id, Options, VerifierKey};

/// Private half of a key pair, handed out for producing new signatures
/// until `rotated_at`.
#[derive(Clone)]
pub struct SigningKey {
    pub(crate) id: String,
    pub(crate) private_key: RsaPrivateKey,
    pub(crate) rotated_at: Timestamp,
    pub(crate) verifiable_until: Timestamp,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("private_key", &"<secret>")
            .field("rotated_at", &self.rotated_at)
            .field("verifiable_until", &self.verifiable_until)
            .finish()
    }
}

impl SigningKey {
    /// Mints a fresh key pair current from `now` on
    pub(crate) fn generate(options: &Options, now: Timestamp) -> Result<Self, RotationError> {
        let mut rng = rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, options.key_size()).context(GenerateSnafu)?;
        let id = id::generate(options.id_alphabet(), options.id_length()).context(IdentifierSnafu)?;

        let rotated_at = now
            .checked_add(options.rotation_frequency())
            .context(TimestampSnafu)?;
        let verifiable_until = now
            .checked_add(options.verification_period())
            .context(TimestampSnafu)?;

        Ok(Self {
            id,
            private_key,
            rotated_at,
            verifiable_until,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Instant after which the key must no longer sign
    pub fn rotated_at(&self) -> Timestamp {
        self.rotated_at
    }

    /// Instant after which the matching public key is no longer served
    pub fn verifiable_until(&self) -> Timestamp {
        self.verifiable_until
    }

    pub fn is_current_at(&self, now: Timestamp) -> bool {
        now <= self.rotated_at
    }

    pub fn verifier_key(&self) -> VerifierKey {
        VerifierKey {
            id: self.id.clone(),
            public_key: self.public_key(),
            expires_at: self.verifiable_until,
        }
    }
}
