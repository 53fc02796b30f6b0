use std::sync::Arc;

use jiff::SignedDuration;
use snafu::{ensure, Snafu};

use crate::clock::{Clock, SystemClock};
use crate::id;

pub const DEFAULT_ROTATION_FREQUENCY: SignedDuration = SignedDuration::from_hours(1);

pub const DEFAULT_KEY_SIZE: usize = 2048;

/// Smallest RSA modulus accepted, in bits
pub const MIN_KEY_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum OptionsError {
    #[snafu(display("rotation frequency {rotation_frequency:?} must be positive"))]
    NonPositiveRotation { rotation_frequency: SignedDuration },
    #[snafu(display(
        "verification period {verification_period:?} is shorter than rotation frequency {rotation_frequency:?}"
    ))]
    VerificationBeforeRotation {
        verification_period: SignedDuration,
        rotation_frequency: SignedDuration,
    },
    #[snafu(display("key size of {key_size} bits is below the minimum of {MIN_KEY_SIZE}"))]
    KeySizeTooSmall { key_size: usize },
    #[snafu(display("key id alphabet is empty"))]
    EmptyIdAlphabet,
    #[snafu(display("key id length must be at least one character"))]
    ZeroIdLength,
}

/// Tuning of the keychain.
///
/// Every setter replaces one value; anything left alone keeps its default.
#[derive(Debug, Clone)]
pub struct Options {
    rotation_frequency: SignedDuration,
    verification_period: Option<SignedDuration>,
    key_size: usize,
    id_alphabet: String,
    id_length: usize,
    clock: Arc<dyn Clock>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rotation_frequency: DEFAULT_ROTATION_FREQUENCY,
            verification_period: None,
            key_size: DEFAULT_KEY_SIZE,
            id_alphabet: id::DEFAULT_ALPHABET.to_owned(),
            id_length: id::DEFAULT_LENGTH,
            clock: Arc::new(SystemClock),
        }
    }
}

impl Options {
    /// How long a signing key stays current before being rotated
    pub fn with_rotation_frequency(mut self, rotation_frequency: SignedDuration) -> Self {
        self.rotation_frequency = rotation_frequency;
        self
    }

    /// How long a public key stays verifiable, counted from its creation.
    /// Defaults to twice the rotation frequency.
    pub fn with_verification_period(mut self, verification_period: SignedDuration) -> Self {
        self.verification_period = Some(verification_period);
        self
    }

    /// RSA modulus size in bits
    pub fn with_key_size(mut self, key_size: usize) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_id_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.id_alphabet = alphabet.into();
        self
    }

    pub fn with_id_length(mut self, length: usize) -> Self {
        self.id_length = length;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rotation_frequency(&self) -> SignedDuration {
        self.rotation_frequency
    }

    pub fn verification_period(&self) -> SignedDuration {
        self.verification_period
            .unwrap_or_else(|| self.rotation_frequency.saturating_mul(2))
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn id_alphabet(&self) -> &str {
        &self.id_alphabet
    }

    pub fn id_length(&self) -> usize {
        self.id_length
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Pause between two purges of expired keys, half the rotation frequency
    pub fn purge_interval(&self) -> SignedDuration {
        self.rotation_frequency / 2
    }

    /// Time a decoded private key stays verifiable after its rotation instant
    pub(crate) fn verification_grace(&self) -> SignedDuration {
        self.verification_period()
            .saturating_sub(self.rotation_frequency)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        let rotation_frequency = self.rotation_frequency;
        let verification_period = self.verification_period();

        ensure!(
            rotation_frequency.is_positive(),
            NonPositiveRotationSnafu { rotation_frequency }
        );
        ensure!(
            verification_period >= rotation_frequency,
            VerificationBeforeRotationSnafu {
                verification_period,
                rotation_frequency,
            }
        );
        ensure!(
            self.key_size >= MIN_KEY_SIZE,
            KeySizeTooSmallSnafu {
                key_size: self.key_size
            }
        );
        ensure!(!self.id_alphabet.is_empty(), EmptyIdAlphabetSnafu);
        ensure!(self.id_length > 0, ZeroIdLengthSnafu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.rotation_frequency(), SignedDuration::from_hours(1));
        assert_eq!(options.verification_period(), SignedDuration::from_hours(2));
        assert_eq!(options.key_size(), 2048);
        assert_eq!(options.id_alphabet().chars().count(), 52);
        assert_eq!(options.id_length(), 8);
        assert_eq!(options.purge_interval(), SignedDuration::from_mins(30));
        assert_eq!(options.validate(), Ok(()));
    }

    #[test]
    fn verification_period_follows_rotation_frequency() {
        let options = Options::default().with_rotation_frequency(SignedDuration::from_millis(200));
        assert_eq!(
            options.verification_period(),
            SignedDuration::from_millis(400)
        );
        assert_eq!(
            options.verification_grace(),
            SignedDuration::from_millis(200)
        );
    }

    #[test]
    fn explicit_verification_period_wins() {
        let options = Options::default()
            .with_rotation_frequency(SignedDuration::from_millis(200))
            .with_verification_period(SignedDuration::from_mins(1));
        assert_eq!(options.verification_period(), SignedDuration::from_mins(1));
        assert_eq!(
            options.verification_grace(),
            SignedDuration::from_millis(59_800)
        );
    }

    #[test]
    fn verification_shorter_than_rotation_is_rejected() {
        let options = Options::default()
            .with_rotation_frequency(SignedDuration::from_mins(10))
            .with_verification_period(SignedDuration::from_mins(5));
        assert!(matches!(
            options.validate(),
            Err(OptionsError::VerificationBeforeRotation { .. })
        ));
    }

    #[test]
    fn equal_periods_are_fine() {
        let options = Options::default()
            .with_rotation_frequency(SignedDuration::from_mins(10))
            .with_verification_period(SignedDuration::from_mins(10));
        assert_eq!(options.validate(), Ok(()));
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            Options::default()
                .with_rotation_frequency(SignedDuration::ZERO)
                .validate(),
            Err(OptionsError::NonPositiveRotation { .. })
        ));
        assert_eq!(
            Options::default().with_key_size(256).validate(),
            Err(OptionsError::KeySizeTooSmall { key_size: 256 })
        );
        assert_eq!(
            Options::default().with_id_alphabet("").validate(),
            Err(OptionsError::EmptyIdAlphabet)
        );
        assert_eq!(
            Options::default().with_id_length(0).validate(),
            Err(OptionsError::ZeroIdLength)
        );
    }
}
