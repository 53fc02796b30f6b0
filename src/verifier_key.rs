use jiff::Timestamp;
use rsa::pkcs8::{spki, EncodePublicKey, LineEnding};
use rsa::RsaPublicKey;

/// Public half of a key pair, used to check signatures made while its
/// signing key was current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierKey {
    pub(crate) id: String,
    pub(crate) public_key: RsaPublicKey,
    pub(crate) expires_at: Timestamp,
}

impl VerifierKey {
    pub fn new(id: impl Into<String>, public_key: RsaPublicKey, expires_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            public_key,
            expires_at,
        }
    }

    /// Same identifier as the signing key it comes from
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now <= self.expires_at
    }

    /// `PUBLIC KEY` PEM of the DER encoded SubjectPublicKeyInfo, LF line endings
    pub fn to_pem(&self) -> Result<String, spki::Error> {
        self.public_key.to_public_key_pem(LineEnding::LF)
    }
}
