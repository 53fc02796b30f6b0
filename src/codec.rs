//! Conversion between key objects and the records a [`Store`](crate::Store) persists.
//!
//! Both halves of a pair share one flat id namespace: the private record uses
//! the key id as is, the public record prepends [`PUBLIC_KEY_ID_PREFIX`].
//! Private keys are stored as PKCS#8 DER, public keys as SubjectPublicKeyInfo DER.

use jiff::{SignedDuration, Timestamp};
use rsa::pkcs8::{spki, DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use snafu::{ensure, ResultExt, Snafu};

use crate::{KeyRecord, SigningKey, VerifierKey};

pub const PUBLIC_KEY_ID_PREFIX: &str = "pub:";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    #[snafu(display("encoding private key {id}"))]
    EncodePrivate { id: String, source: rsa::pkcs8::Error },
    #[snafu(display("encoding public key {id}"))]
    EncodePublic { id: String, source: spki::Error },
    #[snafu(display("decoding private key {id}"))]
    DecodePrivate { id: String, source: rsa::pkcs8::Error },
    #[snafu(display("decoding public key {id}"))]
    DecodePublic { id: String, source: spki::Error },
    #[snafu(display("record {id} does not hold a {expected} key"))]
    UnexpectedKind { id: String, expected: &'static str },
}

/// Storage id of the public record belonging to key `id`
pub fn public_record_id(id: &str) -> String {
    format!("{PUBLIC_KEY_ID_PREFIX}{id}")
}

/// Both records of a freshly minted pair, private first
pub(crate) fn encode_pair(key: &SigningKey) -> Result<[KeyRecord; 2], CodecError> {
    let private_der = key
        .private_key
        .to_pkcs8_der()
        .context(EncodePrivateSnafu { id: &key.id })?;
    let public_der = key
        .private_key
        .to_public_key()
        .to_public_key_der()
        .context(EncodePublicSnafu { id: &key.id })?;

    Ok([
        KeyRecord {
            id: key.id.clone(),
            is_private: true,
            expires_at: key.rotated_at,
            data: private_der.as_bytes().to_vec(),
        },
        KeyRecord {
            id: public_record_id(&key.id),
            is_private: false,
            expires_at: key.verifiable_until,
            data: public_der.as_bytes().to_vec(),
        },
    ])
}

/// Rebuilds a signing key from its private record.
///
/// Only the rotation instant is stored with the private half, the end of the
/// verification window is `expires_at + grace`.
pub(crate) fn decode_signing_key(
    record: &KeyRecord,
    grace: SignedDuration,
) -> Result<SigningKey, CodecError> {
    ensure!(
        record.is_private,
        UnexpectedKindSnafu {
            id: &record.id,
            expected: "private"
        }
    );
    let private_key =
        RsaPrivateKey::from_pkcs8_der(&record.data).context(DecodePrivateSnafu { id: &record.id })?;

    Ok(SigningKey {
        id: record.id.clone(),
        private_key,
        rotated_at: record.expires_at,
        verifiable_until: record
            .expires_at
            .checked_add(grace)
            .unwrap_or(Timestamp::MAX),
    })
}

pub(crate) fn decode_verifier_key(record: &KeyRecord) -> Result<VerifierKey, CodecError> {
    ensure!(
        !record.is_private,
        UnexpectedKindSnafu {
            id: &record.id,
            expected: "public"
        }
    );
    let public_key = RsaPublicKey::from_public_key_der(&record.data)
        .context(DecodePublicSnafu { id: &record.id })?;
    let id = record
        .id
        .strip_prefix(PUBLIC_KEY_ID_PREFIX)
        .unwrap_or(&record.id);

    Ok(VerifierKey::new(id, public_key, record.expires_at))
}
